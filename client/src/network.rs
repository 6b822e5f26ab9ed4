use log::{debug, info, warn};
use shared::{ClientRequest, Entity, ProtocolError, ServerMessage};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Errors raised while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("timed out waiting for the server")]
    Timeout,
    /// The server answered with something other than what the step expects.
    #[error("unexpected message: {0:?}")]
    Unexpected(ServerMessage),
}

/// What the server told us during `connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectInfo {
    pub session_id: u32,
    pub map: String,
    pub config_strings: Vec<(String, String)>,
    /// Snapshot that arrived right after the config strings, if any
    pub first_snapshot: Option<Vec<Entity>>,
}

/// Minimal client that walks the out-of-band handshake.
pub struct ProbeClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    reply_timeout: Duration,
    sequence: u32,
}

impl ProbeClient {
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        Ok(Self::bind(bind_addr, server_addr).await?)
    }

    /// Binds the local socket explicitly, e.g. to loopback in tests.
    pub async fn bind(bind_addr: &str, server_addr: SocketAddr) -> Result<Self, ProbeError> {
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(ProbeClient {
            socket,
            server_addr,
            reply_timeout: Duration::from_secs(2),
            sequence: 0,
        })
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn send(&self, request: &ClientRequest) -> Result<(), ProbeError> {
        self.socket
            .send_to(&request.encode(), self.server_addr)
            .await?;
        Ok(())
    }

    /// Waits for the next message from the server, ignoring other senders.
    pub async fn recv_message(&self, wait: Duration) -> Result<ServerMessage, ProbeError> {
        let mut buffer = [0u8; 2048];

        loop {
            let (len, addr) = timeout(wait, self.socket.recv_from(&mut buffer))
                .await
                .map_err(|_| ProbeError::Timeout)??;

            if addr != self.server_addr {
                debug!("Ignoring {} bytes from {}", len, addr);
                continue;
            }

            return Ok(ServerMessage::parse(&buffer[..len])?);
        }
    }

    /// Sends `getchallenge` and returns the issued token.
    pub async fn request_challenge(&self) -> Result<u64, ProbeError> {
        self.send(&ClientRequest::GetChallenge).await?;

        match self.recv_message(self.reply_timeout).await? {
            ServerMessage::ChallengeResponse { challenge } => {
                info!("Received challenge {}", challenge);
                Ok(challenge)
            }
            other => Err(ProbeError::Unexpected(other)),
        }
    }

    /// Sends `connect` and collects the response plus every config string.
    ///
    /// Config strings keep arriving until the server goes quiet for the
    /// reply timeout or a snapshot shows up. That snapshot is handed back in
    /// `first_snapshot`.
    pub async fn connect(&self, challenge: u64, name: &str) -> Result<ConnectInfo, ProbeError> {
        self.send(&ClientRequest::Connect {
            challenge,
            userinfo: format!("\\name\\{}", name),
        })
        .await?;

        let (session_id, map) = match self.recv_message(self.reply_timeout).await? {
            ServerMessage::ConnectResponse {
                session_id,
                map,
                status,
            } => {
                if status != "ok" {
                    warn!("Server reported connect status {:?}", status);
                }
                (session_id, map)
            }
            other => return Err(ProbeError::Unexpected(other)),
        };

        let mut config_strings = Vec::new();
        let mut first_snapshot = None;
        loop {
            match self.recv_message(self.reply_timeout).await {
                Ok(ServerMessage::ConfigString { key, value }) => {
                    debug!("configString {} = {}", key, value);
                    config_strings.push((key, value));
                }
                Ok(ServerMessage::Snapshot { entities }) => {
                    first_snapshot = Some(entities);
                    break;
                }
                Err(ProbeError::Timeout) => break,
                Ok(other) => return Err(ProbeError::Unexpected(other)),
                Err(e) => return Err(e),
            }
        }

        info!(
            "Connected with session {} on {} ({} config strings)",
            session_id,
            map,
            config_strings.len()
        );

        Ok(ConnectInfo {
            session_id,
            map,
            config_strings,
            first_snapshot,
        })
    }

    /// Sends `ack` and returns the advertised map and game type.
    pub async fn ack(&self) -> Result<(String, String), ProbeError> {
        self.send(&ClientRequest::Ack).await?;

        loop {
            match self.recv_message(self.reply_timeout).await? {
                ServerMessage::GameState { map, game_type } => return Ok((map, game_type)),
                // Snapshots may already be flowing if connect completed first
                ServerMessage::Snapshot { .. } => continue,
                other => return Err(ProbeError::Unexpected(other)),
            }
        }
    }

    /// Sends a status update carrying the next sequence number.
    pub async fn send_status(&mut self) -> Result<u32, ProbeError> {
        self.sequence = self.sequence.wrapping_add(1);
        self.send(&ClientRequest::Status {
            sequence: self.sequence,
            payload: Vec::new(),
        })
        .await?;
        Ok(self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_server() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn reply(server: &UdpSocket, messages: Vec<ServerMessage>) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        let (len, from) = server.recv_from(&mut buf).await.unwrap();
        for message in messages {
            server.send_to(&message.encode(), from).await.unwrap();
        }
        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn test_request_challenge() {
        let (server, server_addr) = fake_server().await;
        let client = ProbeClient::bind("127.0.0.1:0", server_addr).await.unwrap();

        let responder = tokio::spawn(async move {
            reply(&server, vec![ServerMessage::ChallengeResponse { challenge: 99 }]).await
        });

        assert_eq!(client.request_challenge().await.unwrap(), 99);
        let request = responder.await.unwrap();
        assert_eq!(shared::classify(&request), shared::Command::GetChallenge);
    }

    #[tokio::test]
    async fn test_connect_collects_config_strings() {
        let (server, server_addr) = fake_server().await;
        let client = ProbeClient::bind("127.0.0.1:0", server_addr)
            .await
            .unwrap()
            .with_reply_timeout(Duration::from_millis(200));

        let responder = tokio::spawn(async move {
            reply(
                &server,
                vec![
                    ServerMessage::ConnectResponse {
                        session_id: 4,
                        map: "mp_harbor".to_string(),
                        status: "ok".to_string(),
                    },
                    ServerMessage::ConfigString {
                        key: "mapname".to_string(),
                        value: "mp_harbor".to_string(),
                    },
                    ServerMessage::ConfigString {
                        key: "gametype".to_string(),
                        value: "dm".to_string(),
                    },
                ],
            )
            .await
        });

        let info = client.connect(7, "tester").await.unwrap();
        assert_eq!(info.session_id, 4);
        assert_eq!(info.map, "mp_harbor");
        assert_eq!(info.config_strings.len(), 2);
        assert_eq!(info.config_strings[1], ("gametype".to_string(), "dm".to_string()));
        assert!(info.first_snapshot.is_none());

        let request = responder.await.unwrap();
        assert!(request.len() >= shared::MIN_CONNECT_LEN);
        assert_eq!(shared::classify(&request), shared::Command::Connect);
    }

    #[tokio::test]
    async fn test_unexpected_reply() {
        let (server, server_addr) = fake_server().await;
        let client = ProbeClient::bind("127.0.0.1:0", server_addr).await.unwrap();

        tokio::spawn(async move {
            reply(
                &server,
                vec![ServerMessage::GameState {
                    map: "mp_harbor".to_string(),
                    game_type: "dm".to_string(),
                }],
            )
            .await
        });

        assert!(matches!(
            client.request_challenge().await,
            Err(ProbeError::Unexpected(ServerMessage::GameState { .. }))
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (_server, server_addr) = fake_server().await;
        let client = ProbeClient::bind("127.0.0.1:0", server_addr)
            .await
            .unwrap()
            .with_reply_timeout(Duration::from_millis(50));

        assert!(matches!(
            client.request_challenge().await,
            Err(ProbeError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_status_sequence_increments() {
        let (server, server_addr) = fake_server().await;
        let mut client = ProbeClient::bind("127.0.0.1:0", server_addr).await.unwrap();

        assert_eq!(client.send_status().await.unwrap(), 1);
        assert_eq!(client.send_status().await.unwrap(), 2);

        let mut buf = [0u8; 64];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(shared::decode_sequence(&buf[..len]), Ok(1));
    }

    #[tokio::test]
    async fn test_connect_keeps_snapshot_that_ends_config_strings() {
        let (server, server_addr) = fake_server().await;
        let client = ProbeClient::bind("127.0.0.1:0", server_addr).await.unwrap();
        let entities = vec![Entity::new(3, [1.0, 2.0, 3.0], "active")];

        let world = entities.clone();
        tokio::spawn(async move {
            reply(
                &server,
                vec![
                    ServerMessage::ConnectResponse {
                        session_id: 1,
                        map: "mp_harbor".to_string(),
                        status: "ok".to_string(),
                    },
                    ServerMessage::ConfigString {
                        key: "mapname".to_string(),
                        value: "mp_harbor".to_string(),
                    },
                    ServerMessage::Snapshot { entities: world },
                ],
            )
            .await
        });

        let info = client.connect(7, "tester").await.unwrap();
        assert_eq!(info.config_strings.len(), 1);
        assert_eq!(info.first_snapshot, Some(entities));
    }
}
