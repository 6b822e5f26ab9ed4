//! # Probe Client Library
//!
//! A small client for the out-of-band server. It walks the handshake the way
//! a game client would and then listens for world snapshots, which makes it
//! useful for smoke-testing a running server and for integration tests.
//!
//! ## Handshake
//!
//! 1. `getchallenge` is answered with a `challengeResponse` token.
//! 2. `connect` (padded to the server's minimum size) is answered with a
//!    `connectResponse` and one `configString` per server setting. The
//!    server marks the client ready at this point.
//! 3. `ack` is optional and returns the `gamestate` line.
//!
//! After that the server pushes a `snapshot` every tick until the client
//! goes away.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ProbeClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ProbeClient::new("127.0.0.1:28960").await?;
//!
//!     let challenge = client.request_challenge().await?;
//!     let info = client.connect(challenge, "probe").await?;
//!     println!("session {} on {}", info.session_id, info.map);
//!
//!     let snapshot = client.recv_message(Duration::from_secs(1)).await?;
//!     println!("{:?}", snapshot);
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{ConnectInfo, ProbeClient, ProbeError};
