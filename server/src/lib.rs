//! # Out-of-Band Game Server Library
//!
//! This library implements the server side of a connectionless, id-Tech style
//! UDP protocol: a `getchallenge` / `connect` / `ack` handshake, config strings
//! pushed on connect, and world snapshots broadcast every 50 ms to every
//! client that finished the handshake.
//!
//! ## Core Responsibilities
//!
//! ### Handshake
//! Each inbound datagram is classified by the shared wire codec and handled to
//! completion before the next one is read. A client moves from `Unknown` to
//! `Connecting` when its `connect` is answered, and to `Ready` once config
//! strings or the game state have been delivered.
//!
//! ### Snapshot Distribution
//! A separate task wakes on a fixed period, serializes the current entity set
//! once and sends the same datagram to every ready address.
//!
//! ## Architecture Design
//!
//! ### Shared Session Registry
//! The [`session::SessionRegistry`] is the only state touched by both the
//! receive loop and the broadcaster. It is created by the [`network::Server`]
//! and injected into both as an `Arc`; it locks internally so snapshot reads
//! always observe a consistent set of targets.
//!
//! ### Fire-and-Forget Sends
//! Every reply is a single UDP write. Failures are logged and never retried;
//! the peer is expected to resend if it sees no progress. The only fatal path
//! is a failure of the OS randomness source while issuing a challenge.
//!
//! ## Module Organization
//!
//! - `broadcast`: timed snapshot fan-out
//! - `challenge`: CSPRNG-backed challenge tokens
//! - `config`: server config loading (`key: value` files and JSON)
//! - `dispatcher`: datagram routing and the handshake state machine
//! - `network`: socket ownership, receive loop and background tasks
//! - `session`: per-address session registry and phases
//! - `world`: entity table shared with the external simulation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::{Server, ServerSettings};
//! use server::world::EntityTable;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = Arc::new(EntityTable::default());
//!     let server = Server::new(ServerSettings::default(), ServerConfig::default(), world).await?;
//!
//!     // Receives datagrams until the randomness source fails; snapshots are
//!     // broadcast from a background task in the meantime.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod challenge;
pub mod config;
pub mod dispatcher;
pub mod network;
pub mod session;
pub mod utils;
pub mod world;
