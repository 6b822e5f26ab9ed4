//! Out-of-band packet framing.
//!
//! Inbound classification is order-sensitive: `getchallenge`, then `connect`
//! (only when the datagram is at least [`MIN_CONNECT_LEN`] bytes), then `ack`,
//! then any datagram of exactly [`CONTROL_PACKET_LEN`] bytes, and finally
//! everything else is a status update. The 16-byte rule does not look at the
//! marker.

use crate::snapshot::{parse_snapshot_body, serialize_snapshot, Entity};

/// Prefix of every connectionless packet.
pub const OOB_MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Smallest datagram accepted as a `connect` request.
pub const MIN_CONNECT_LEN: usize = 136;

/// Size of the marker-less control packet.
pub const CONTROL_PACKET_LEN: usize = 16;

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 28960;

const GET_CHALLENGE: &str = "getchallenge";
const CONNECT: &str = "connect";
const ACK: &str = "ack";

const CHALLENGE_RESPONSE: &str = "challengeResponse";
const CONNECT_RESPONSE: &str = "connectResponse";
const CONFIG_STRING: &str = "configString";
const GAME_STATE: &str = "gamestate";
const SNAPSHOT: &str = "snapshot";

/// Errors produced while decoding datagrams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer than 4 bytes were available for a sequence number.
    #[error("packet too short: {len} bytes, need at least 4")]
    TooShort { len: usize },
    /// The datagram did not begin with the out-of-band marker.
    #[error("missing out-of-band marker")]
    MissingMarker,
    /// The command token is not one this side understands.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    /// The command was recognised but its payload was not.
    #[error("malformed {command} payload: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },
}

/// Classification of an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetChallenge,
    Connect,
    Ack,
    SixteenByteControl,
    StatusUpdate,
}

fn has_command(payload: &[u8], token: &str) -> bool {
    payload
        .strip_prefix(&OOB_MARKER[..])
        .is_some_and(|rest| rest.starts_with(token.as_bytes()))
}

/// Classifies a raw datagram. Total: every payload maps to exactly one command.
pub fn classify(payload: &[u8]) -> Command {
    if has_command(payload, GET_CHALLENGE) {
        Command::GetChallenge
    } else if has_command(payload, CONNECT) && payload.len() >= MIN_CONNECT_LEN {
        Command::Connect
    } else if has_command(payload, ACK) {
        Command::Ack
    } else if payload.len() == CONTROL_PACKET_LEN {
        Command::SixteenByteControl
    } else {
        Command::StatusUpdate
    }
}

/// Reads the big-endian sequence number from the first 4 bytes.
pub fn decode_sequence(payload: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|head| head.try_into().ok())
        .ok_or(ProtocolError::TooShort { len: payload.len() })?;
    Ok(u32::from_be_bytes(bytes))
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(OOB_MARKER.len() + body.len());
    packet.extend_from_slice(&OOB_MARKER);
    packet.extend_from_slice(body);
    packet
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ChallengeResponse {
        challenge: u64,
    },
    ConnectResponse {
        session_id: u32,
        map: String,
        status: String,
    },
    ConfigString {
        key: String,
        value: String,
    },
    GameState {
        map: String,
        game_type: String,
    },
    Snapshot {
        entities: Vec<Entity>,
    },
}

impl ServerMessage {
    /// Encodes the message including the out-of-band marker.
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            ServerMessage::ChallengeResponse { challenge } => {
                format!("{} {}", CHALLENGE_RESPONSE, challenge)
            }
            ServerMessage::ConnectResponse {
                session_id,
                map,
                status,
            } => format!(
                "{}\nsessionid={};map={};status={};",
                CONNECT_RESPONSE, session_id, map, status
            ),
            ServerMessage::ConfigString { key, value } => {
                format!("{} {} {}\n", CONFIG_STRING, key, value)
            }
            ServerMessage::GameState { map, game_type } => {
                format!("{} map={};gametype={};", GAME_STATE, map, game_type)
            }
            ServerMessage::Snapshot { entities } => {
                format!("{}\n{}", SNAPSHOT, serialize_snapshot(entities))
            }
        };
        frame(body.as_bytes())
    }

    /// Parses a datagram received from the server.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let rest = datagram
            .strip_prefix(&OOB_MARKER[..])
            .ok_or(ProtocolError::MissingMarker)?;
        let text = String::from_utf8_lossy(rest);

        if let Some(token) = text.strip_prefix(CHALLENGE_RESPONSE) {
            let challenge = token.trim().parse().map_err(|_| ProtocolError::Malformed {
                command: CHALLENGE_RESPONSE,
                reason: format!("bad challenge {:?}", token.trim()),
            })?;
            Ok(ServerMessage::ChallengeResponse { challenge })
        } else if let Some(fields) = text.strip_prefix(CONNECT_RESPONSE) {
            parse_connect_response(fields.trim_start_matches('\n'))
        } else if let Some(entry) = text.strip_prefix(CONFIG_STRING) {
            let entry = entry.trim_start().trim_end_matches('\n');
            let (key, value) = entry.split_once(' ').ok_or_else(|| ProtocolError::Malformed {
                command: CONFIG_STRING,
                reason: format!("no value in {:?}", entry),
            })?;
            Ok(ServerMessage::ConfigString {
                key: key.to_string(),
                value: value.to_string(),
            })
        } else if let Some(fields) = text.strip_prefix(GAME_STATE) {
            let map = field(fields, "map").ok_or_else(|| missing(GAME_STATE, "map"))?;
            let game_type =
                field(fields, "gametype").ok_or_else(|| missing(GAME_STATE, "gametype"))?;
            Ok(ServerMessage::GameState {
                map: map.to_string(),
                game_type: game_type.to_string(),
            })
        } else if let Some(body) = text.strip_prefix(SNAPSHOT) {
            let entities = parse_snapshot_body(body.trim_start_matches('\n'))?;
            Ok(ServerMessage::Snapshot { entities })
        } else {
            let command = text.split_whitespace().next().unwrap_or_default();
            Err(ProtocolError::UnknownCommand(command.to_string()))
        }
    }
}

/// Looks up `name=value` in a `;`-separated field list.
fn field<'a>(fields: &'a str, name: &str) -> Option<&'a str> {
    fields
        .trim()
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn missing(command: &'static str, name: &str) -> ProtocolError {
    ProtocolError::Malformed {
        command,
        reason: format!("missing field {}", name),
    }
}

fn parse_connect_response(fields: &str) -> Result<ServerMessage, ProtocolError> {
    let raw_id = field(fields, "sessionid").ok_or_else(|| missing(CONNECT_RESPONSE, "sessionid"))?;
    let session_id = raw_id.parse().map_err(|_| ProtocolError::Malformed {
        command: CONNECT_RESPONSE,
        reason: format!("bad session id {:?}", raw_id),
    })?;
    let map = field(fields, "map").ok_or_else(|| missing(CONNECT_RESPONSE, "map"))?;
    let status = field(fields, "status").ok_or_else(|| missing(CONNECT_RESPONSE, "status"))?;
    Ok(ServerMessage::ConnectResponse {
        session_id,
        map: map.to_string(),
        status: status.to_string(),
    })
}

/// Requests a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    GetChallenge,
    /// Padded with NUL bytes up to [`MIN_CONNECT_LEN`].
    Connect {
        challenge: u64,
        userinfo: String,
    },
    Ack,
    /// In-game status update: sequence number followed by an opaque payload.
    Status {
        sequence: u32,
        payload: Vec<u8>,
    },
    /// Marker-less 16-byte control packet.
    Control {
        sequence: u32,
    },
}

impl ClientRequest {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientRequest::GetChallenge => frame(GET_CHALLENGE.as_bytes()),
            ClientRequest::Connect {
                challenge,
                userinfo,
            } => {
                let mut packet =
                    frame(format!("{} {} \"{}\"", CONNECT, challenge, userinfo).as_bytes());
                if packet.len() < MIN_CONNECT_LEN {
                    packet.resize(MIN_CONNECT_LEN, 0);
                }
                packet
            }
            ClientRequest::Ack => frame(ACK.as_bytes()),
            ClientRequest::Status { sequence, payload } => {
                let mut packet = sequence.to_be_bytes().to_vec();
                packet.extend_from_slice(payload);
                packet
            }
            ClientRequest::Control { sequence } => {
                let mut packet = vec![0u8; CONTROL_PACKET_LEN];
                packet[..4].copy_from_slice(&sequence.to_be_bytes());
                packet
            }
        }
    }
}
