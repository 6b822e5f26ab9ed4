//! Wire protocol shared by the server and the probe client.
//!
//! Every connectionless packet starts with the 4-byte out-of-band marker
//! `0xFFFFFFFF` followed by an ASCII command token. The server classifies
//! inbound datagrams with [`classify`] and encodes replies with
//! [`ServerMessage::encode`]; the client does the reverse with
//! [`ClientRequest::encode`] and [`ServerMessage::parse`].

pub mod snapshot;
pub mod wire;

pub use snapshot::{parse_snapshot_body, serialize_snapshot, Entity, SNAPSHOT_HEADER};
pub use wire::{
    classify, decode_sequence, ClientRequest, Command, ProtocolError, ServerMessage,
    CONTROL_PACKET_LEN, DEFAULT_PORT, MIN_CONNECT_LEN, OOB_MARKER,
};
