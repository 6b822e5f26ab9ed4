//! Server network layer: socket ownership, receive loop and background tasks

use crate::broadcast::{SnapshotBroadcaster, SNAPSHOT_INTERVAL};
use crate::challenge::ChallengeError;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::session::SessionRegistry;
use crate::world::EntityTable;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Largest datagram the receive loop accepts.
const RECV_BUFFER_SIZE: usize = 2048;

/// How often idle sessions are swept when eviction is enabled.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime knobs that are not part of the advertised server config
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub snapshot_interval: Duration,
    /// `None` keeps sessions for the lifetime of the process.
    pub session_timeout: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", shared::DEFAULT_PORT),
            snapshot_interval: SNAPSHOT_INTERVAL,
            session_timeout: None,
        }
    }
}

/// Out-of-band protocol server
///
/// Owns the UDP socket and the session registry, and injects both into the
/// dispatcher (receive loop) and the snapshot broadcaster (timer task).
pub struct Server {
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    world: Arc<EntityTable>,
    dispatcher: Dispatcher,
    settings: ServerSettings,
}

impl Server {
    pub async fn new(
        settings: ServerSettings,
        config: ServerConfig,
        world: Arc<EntityTable>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&settings.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&socket),
            Arc::clone(&registry),
            Arc::new(config),
        );

        Ok(Server {
            socket,
            registry,
            world,
            dispatcher,
            settings,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared handle to the session registry
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Spawns the snapshot broadcaster on its own timer
    fn spawn_broadcaster(&self) -> JoinHandle<()> {
        let broadcaster = SnapshotBroadcaster::new(
            Arc::clone(&self.socket),
            Arc::clone(&self.registry),
            Arc::clone(&self.world),
            self.settings.snapshot_interval,
        );
        tokio::spawn(broadcaster.run())
    }

    /// Spawns the idle session sweep
    fn spawn_idle_sweeper(&self, timeout: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL);

            loop {
                interval.tick().await;

                let evicted = registry.evict_idle(timeout).await;
                if !evicted.is_empty() {
                    info!("Evicted {} idle sessions", evicted.len());
                }
            }
        })
    }

    /// Runs the receive loop until the challenge randomness source fails
    ///
    /// Datagrams are handled one at a time; transport errors are logged and
    /// the loop carries on.
    pub async fn run(&self) -> Result<(), ChallengeError> {
        let broadcaster = self.spawn_broadcaster();
        let sweeper = self
            .settings
            .session_timeout
            .map(|timeout| self.spawn_idle_sweeper(timeout));

        info!("Server started successfully");

        let result = self.receive_loop().await;

        broadcaster.abort();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }

    async fn receive_loop(&self) -> Result<(), ChallengeError> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    if let Err(e) = self.dispatcher.handle_datagram(&buffer[..len], addr).await {
                        error!("Fatal error while handling {}: {}", addr, e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    warn!("Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
