//! Inbound datagram routing and the connect handshake.
//!
//! Each datagram is classified with [`shared::classify`] and handled to
//! completion before the next one is read. Replies are fire-and-forget: a
//! failed send is logged and the exchange is abandoned, leaving it to the
//! peer to retry. The only error returned to the receive loop is a failure
//! of the challenge randomness source, which is fatal.

use crate::challenge::{ChallengeError, ChallengeGenerator};
use crate::config::ServerConfig;
use crate::session::SessionRegistry;
use crate::utils::hex_preview;
use log::{debug, error, info, warn};
use shared::{classify, decode_sequence, Command, ServerMessage};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Routes datagrams to their handlers and drives session phases.
pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    config: Arc<ServerConfig>,
    challenges: ChallengeGenerator,
}

impl Dispatcher {
    pub fn new(
        socket: Arc<UdpSocket>,
        registry: Arc<SessionRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            socket,
            registry,
            config,
            challenges: ChallengeGenerator::new(),
        }
    }

    /// Handles one datagram and returns how it was classified.
    pub async fn handle_datagram(
        &self,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<Command, ChallengeError> {
        debug!(
            "Received {} bytes from {}: {}",
            data.len(),
            addr,
            hex_preview(data)
        );

        let command = classify(data);
        match command {
            Command::GetChallenge => self.handle_get_challenge(addr).await?,
            Command::Connect => self.handle_connect(addr).await,
            Command::Ack => self.handle_ack(addr).await,
            Command::SixteenByteControl => self.handle_control(data, addr).await,
            Command::StatusUpdate => self.handle_status_update(data, addr).await,
        }
        Ok(command)
    }

    async fn send(&self, message: &ServerMessage, addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(&message.encode(), addr).await
    }

    async fn handle_get_challenge(&self, addr: SocketAddr) -> Result<(), ChallengeError> {
        let response = self.challenges.next_response()?;
        match self.send(&response, addr).await {
            Ok(_) => debug!("Challenge response sent to {}", addr),
            Err(e) => error!("Failed to send challenge response to {}: {}", addr, e),
        }
        Ok(())
    }

    /// Answers `connect`, pushes config strings and marks the session ready.
    async fn handle_connect(&self, addr: SocketAddr) {
        info!("Client connecting from {}", addr);

        let session_id = self.registry.reserve_session_id(addr).await;
        let response = ServerMessage::ConnectResponse {
            session_id,
            map: self.config.map.clone(),
            status: "ok".to_string(),
        };

        if let Err(e) = self.send(&response, addr).await {
            error!("Failed to send connect response to {}: {}", addr, e);
            return;
        }

        self.registry.record_connect(addr, session_id).await;
        self.send_config_strings(addr).await;
        self.registry.mark_ready(addr).await;
    }

    async fn send_config_strings(&self, addr: SocketAddr) {
        for (key, value) in self.config.config_strings() {
            let message = ServerMessage::ConfigString { key, value };
            if let Err(e) = self.send(&message, addr).await {
                error!("Failed to send config string to {}: {}", addr, e);
            }
        }
    }

    async fn handle_ack(&self, addr: SocketAddr) {
        let game_state = ServerMessage::GameState {
            map: self.config.map.clone(),
            game_type: self.config.game_type.clone(),
        };

        match self.send(&game_state, addr).await {
            Ok(_) => {
                debug!("Game state sent to {}", addr);
                self.registry.mark_ready(addr).await;
            }
            Err(e) => error!("Failed to send game state to {}: {}", addr, e),
        }
    }

    async fn handle_control(&self, data: &[u8], addr: SocketAddr) {
        match decode_sequence(data) {
            Ok(sequence) => {
                debug!("16-byte packet from {} with sequence {}", addr, sequence);
                self.registry.touch(addr).await;
            }
            Err(e) => warn!("Dropping control packet from {}: {}", addr, e),
        }
    }

    async fn handle_status_update(&self, data: &[u8], addr: SocketAddr) {
        match decode_sequence(data) {
            Ok(sequence) => {
                debug!("Status update from {} with sequence {}", addr, sequence);
                self.registry.touch(addr).await;
            }
            Err(e) => warn!("Dropping status update from {}: {}", addr, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPhase;
    use shared::{ClientRequest, OOB_MARKER};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        dispatcher: Dispatcher,
        registry: Arc<SessionRegistry>,
        peer: UdpSocket,
        peer_addr: SocketAddr,
    }

    async fn harness() -> Harness {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let registry = Arc::new(SessionRegistry::new());
        let config = Arc::new(ServerConfig::default());
        let dispatcher = Dispatcher::new(socket, Arc::clone(&registry), config);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        Harness {
            dispatcher,
            registry,
            peer,
            peer_addr,
        }
    }

    async fn recv(peer: &UdpSocket) -> ServerMessage {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        ServerMessage::parse(&buf[..len]).unwrap()
    }

    async fn assert_silent(peer: &UdpSocket) {
        let mut buf = [0u8; 2048];
        let result = timeout(Duration::from_millis(100), peer.recv_from(&mut buf)).await;
        assert!(result.is_err(), "Expected no reply");
    }

    #[tokio::test]
    async fn test_get_challenge_leaves_registry_alone() {
        let h = harness().await;
        let command = h
            .dispatcher
            .handle_datagram(&ClientRequest::GetChallenge.encode(), h.peer_addr)
            .await
            .unwrap();

        assert_eq!(command, Command::GetChallenge);
        assert!(matches!(
            recv(&h.peer).await,
            ServerMessage::ChallengeResponse { .. }
        ));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_connect_sends_config_strings_and_marks_ready() {
        let h = harness().await;
        let request = ClientRequest::Connect {
            challenge: 1,
            userinfo: String::new(),
        }
        .encode();

        h.dispatcher.handle_datagram(&request, h.peer_addr).await.unwrap();

        match recv(&h.peer).await {
            ServerMessage::ConnectResponse {
                session_id,
                map,
                status,
            } => {
                assert_eq!(session_id, 1);
                assert_eq!(map, "mp_harbor");
                assert_eq!(status, "ok");
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        let expected = ServerConfig::default().config_strings();
        for (key, value) in expected {
            assert_eq!(
                recv(&h.peer).await,
                ServerMessage::ConfigString { key, value }
            );
        }

        assert_eq!(h.registry.phase(h.peer_addr).await, SessionPhase::Ready);
        assert_eq!(h.registry.snapshot_targets().await, vec![h.peer_addr]);
    }

    #[tokio::test]
    async fn test_repeated_connect_keeps_session_id() {
        let h = harness().await;
        let request = ClientRequest::Connect {
            challenge: 1,
            userinfo: String::new(),
        }
        .encode();

        h.dispatcher.handle_datagram(&request, h.peer_addr).await.unwrap();
        h.dispatcher.handle_datagram(&request, h.peer_addr).await.unwrap();

        assert_eq!(h.registry.len().await, 1);
        assert_eq!(h.registry.get(h.peer_addr).await.unwrap().session_id, 1);
    }

    #[tokio::test]
    async fn test_ack_sends_game_state_and_marks_ready() {
        let h = harness().await;
        h.dispatcher
            .handle_datagram(&ClientRequest::Ack.encode(), h.peer_addr)
            .await
            .unwrap();

        assert_eq!(
            recv(&h.peer).await,
            ServerMessage::GameState {
                map: "mp_harbor".to_string(),
                game_type: "dm".to_string(),
            }
        );
        assert_eq!(h.registry.phase(h.peer_addr).await, SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_short_connect_is_a_status_update() {
        let h = harness().await;
        let mut packet = OOB_MARKER.to_vec();
        packet.extend_from_slice(b"connect 12 \"\"");

        let command = h.dispatcher.handle_datagram(&packet, h.peer_addr).await.unwrap();
        assert_eq!(command, Command::StatusUpdate);
        assert_silent(&h.peer).await;
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_short_status_update_is_dropped() {
        let h = harness().await;
        let command = h
            .dispatcher
            .handle_datagram(&[0x00, 0x00, 0x2A], h.peer_addr)
            .await
            .unwrap();

        assert_eq!(command, Command::StatusUpdate);
        assert_silent(&h.peer).await;
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_control_and_status_do_not_change_phase() {
        let h = harness().await;
        h.registry.lookup_or_create(h.peer_addr).await;

        let control = ClientRequest::Control { sequence: 5 }.encode();
        let status = ClientRequest::Status {
            sequence: 6,
            payload: vec![0; 20],
        }
        .encode();

        assert_eq!(
            h.dispatcher.handle_datagram(&control, h.peer_addr).await.unwrap(),
            Command::SixteenByteControl
        );
        assert_eq!(
            h.dispatcher.handle_datagram(&status, h.peer_addr).await.unwrap(),
            Command::StatusUpdate
        );

        assert_silent(&h.peer).await;
        assert_eq!(h.registry.phase(h.peer_addr).await, SessionPhase::Connecting);
    }

    #[tokio::test]
    async fn test_unknown_sender_status_creates_nothing() {
        let h = harness().await;
        let status = ClientRequest::Status {
            sequence: 42,
            payload: Vec::new(),
        }
        .encode();

        h.dispatcher.handle_datagram(&status, h.peer_addr).await.unwrap();
        assert!(h.registry.is_empty().await);
    }

    /// IPv6 destination the IPv4-bound server socket cannot send to
    fn unreachable_peer() -> SocketAddr {
        "[::1]:9".parse().unwrap()
    }

    #[tokio::test]
    async fn test_failed_connect_response_stores_no_session() {
        let h = harness().await;
        let request = ClientRequest::Connect {
            challenge: 1,
            userinfo: String::new(),
        }
        .encode();

        let command = h
            .dispatcher
            .handle_datagram(&request, unreachable_peer())
            .await
            .unwrap();

        assert_eq!(command, Command::Connect);
        assert_eq!(h.registry.phase(unreachable_peer()).await, SessionPhase::Unknown);
        assert!(h.registry.is_empty().await);
        assert!(h.registry.snapshot_targets().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_game_state_keeps_phase() {
        let h = harness().await;
        let ack = ClientRequest::Ack.encode();

        h.dispatcher.handle_datagram(&ack, unreachable_peer()).await.unwrap();
        assert_eq!(h.registry.phase(unreachable_peer()).await, SessionPhase::Unknown);
        assert!(h.registry.is_empty().await);

        h.registry.lookup_or_create(unreachable_peer()).await;
        h.dispatcher.handle_datagram(&ack, unreachable_peer()).await.unwrap();
        assert_eq!(
            h.registry.phase(unreachable_peer()).await,
            SessionPhase::Connecting
        );
        assert!(h.registry.snapshot_targets().await.is_empty());
    }
}
