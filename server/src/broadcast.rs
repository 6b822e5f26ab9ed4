//! Periodic world snapshot fan-out.
//!
//! Once per tick the broadcaster copies the entity table, encodes a single
//! `snapshot` datagram and sends it to every ready session. Sends never wait
//! for an acknowledgment, and a failure for one recipient does not affect the
//! others or later ticks.

use crate::session::SessionRegistry;
use crate::world::EntityTable;
use log::{debug, error};
use shared::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

/// Default time between snapshots.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a single broadcast tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub sent: usize,
    pub failed: usize,
}

pub struct SnapshotBroadcaster {
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    world: Arc<EntityTable>,
    period: Duration,
}

impl SnapshotBroadcaster {
    pub fn new(
        socket: Arc<UdpSocket>,
        registry: Arc<SessionRegistry>,
        world: Arc<EntityTable>,
        period: Duration,
    ) -> Self {
        Self {
            socket,
            registry,
            world,
            period,
        }
    }

    /// Sends one snapshot to every ready session.
    pub async fn broadcast_once(&self) -> BroadcastStats {
        let targets = self.registry.snapshot_targets().await;
        let mut stats = BroadcastStats::default();
        if targets.is_empty() {
            return stats;
        }

        let packet = ServerMessage::Snapshot {
            entities: self.world.snapshot(),
        }
        .encode();

        for addr in targets {
            match self.socket.send_to(&packet, addr).await {
                Ok(_) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!("Failed to send snapshot to {}: {}", addr, e);
                }
            }
        }

        stats
    }

    /// Broadcasts forever on the configured period.
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            let stats = self.broadcast_once().await;
            tick += 1;

            // Roughly every 5 seconds at the default rate
            if tick % 100 == 0 && stats.sent + stats.failed > 0 {
                debug!(
                    "Snapshot tick {}: {} sent, {} failed",
                    tick, stats.sent, stats.failed
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Entity, ServerMessage};
    use tokio::time::timeout;

    async fn broadcaster(registry: Arc<SessionRegistry>) -> SnapshotBroadcaster {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let world = Arc::new(EntityTable::new(vec![Entity::new(
            1,
            [100.0, 200.0, 300.0],
            "active",
        )]));
        SnapshotBroadcaster::new(socket, registry, world, SNAPSHOT_INTERVAL)
    }

    #[tokio::test]
    async fn test_no_targets_sends_nothing() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = broadcaster(Arc::clone(&registry)).await;

        assert_eq!(broadcaster.broadcast_once().await, BroadcastStats::default());
    }

    #[tokio::test]
    async fn test_only_ready_sessions_receive_snapshots() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = broadcaster(Arc::clone(&registry)).await;

        let ready = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let connecting = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        registry.mark_ready(ready.local_addr().unwrap()).await;
        registry.lookup_or_create(connecting.local_addr().unwrap()).await;

        let stats = broadcaster.broadcast_once().await;
        assert_eq!(stats, BroadcastStats { sent: 1, failed: 0 });

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(1), ready.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            &buf[4..len],
            b"snapshot\nCOD1GameState|EntityID:1|PosX:100.00|PosY:200.00|PosZ:300.00|State:active|"
                .as_slice()
        );

        let nothing = timeout(Duration::from_millis(100), connecting.recv_from(&mut buf)).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_run_keeps_ticking() {
        let registry = Arc::new(SessionRegistry::new());
        let mut broadcaster = broadcaster(Arc::clone(&registry)).await;
        broadcaster.period = Duration::from_millis(10);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        registry.mark_ready(client.local_addr().unwrap()).await;

        let handle = tokio::spawn(broadcaster.run());

        let mut buf = [0u8; 2048];
        for _ in 0..3 {
            let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(buf[4..len].starts_with(b"snapshot\n"));
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_snapshot_reflects_world_positions() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = broadcaster(Arc::clone(&registry)).await;
        broadcaster.world.replace(vec![Entity::new(9, [1.234, -5.5, 0.006], "moving")]);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        registry.mark_ready(client.local_addr().unwrap()).await;
        broadcaster.broadcast_once().await;

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match ServerMessage::parse(&buf[..len]).unwrap() {
            ServerMessage::Snapshot { entities } => {
                assert_eq!(entities.len(), 1);
                assert_eq!(entities[0].id, 9);
                assert_approx_eq!(entities[0].position[0], 1.23, 1e-9);
                assert_approx_eq!(entities[0].position[1], -5.5, 1e-9);
                assert_approx_eq!(entities[0].position[2], 0.01, 1e-9);
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_send_does_not_stop_fan_out() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = broadcaster(Arc::clone(&registry)).await;

        // The broadcaster socket is IPv4, so this target always fails
        registry.mark_ready("[::1]:9".parse().unwrap()).await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        registry.mark_ready(peer.local_addr().unwrap()).await;

        let stats = broadcaster.broadcast_once().await;
        assert_eq!(stats, BroadcastStats { sent: 1, failed: 1 });

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf[4..len].starts_with(b"snapshot\nCOD1GameState|"));
    }
}
