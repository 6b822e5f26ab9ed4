//! Per-address session tracking for the connectionless handshake
//!
//! This module owns the only piece of state shared between the receive loop
//! and the snapshot broadcaster:
//! - Session lifecycle (`Unknown` -> `Connecting` -> `Ready`)
//! - Session identifiers handed out in `connectResponse`
//! - The set of addresses that should receive snapshots
//! - Optional idle eviction
//!
//! The registry locks internally, so callers share it through an `Arc` and
//! never hold a guard across a socket send.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Handshake progress of a single remote address
///
/// `Unknown` is never stored; it is what the registry reports for an
/// address without a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unknown,
    Connecting,
    Ready,
}

/// Handshake steps that move a session between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// `connect` was answered, a row must exist.
    Connected,
    /// Config strings or the game state were delivered.
    Completed,
}

impl SessionPhase {
    /// Transition function of the handshake state machine
    ///
    /// `Ready` is terminal: nothing in the protocol moves a session back.
    pub fn advance(self, event: HandshakeEvent) -> SessionPhase {
        match (self, event) {
            (SessionPhase::Ready, _) => SessionPhase::Ready,
            (_, HandshakeEvent::Completed) => SessionPhase::Ready,
            (SessionPhase::Unknown, HandshakeEvent::Connected) => SessionPhase::Connecting,
            (SessionPhase::Connecting, HandshakeEvent::Connected) => SessionPhase::Connecting,
        }
    }
}

/// Protocol progress of one remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    /// Transport endpoint, the registry key
    pub remote_address: SocketAddr,
    /// Identifier reported in `connectResponse`
    pub session_id: u32,
    /// Current handshake phase, never `Unknown` for a stored session
    pub phase: SessionPhase,
    /// Last time a handshake step or valid datagram was seen from this peer
    pub last_seen: Instant,
}

impl ClientSession {
    fn new(session_id: u32, remote_address: SocketAddr) -> Self {
        Self {
            remote_address,
            session_id,
            phase: SessionPhase::Connecting,
            last_seen: Instant::now(),
        }
    }

    /// Whether the peer should receive world snapshots
    pub fn ready_for_snapshots(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    fn apply(&mut self, event: HandshakeEvent) {
        self.phase = self.phase.advance(event);
        self.last_seen = Instant::now();
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

struct Inner {
    sessions: HashMap<SocketAddr, ClientSession>,
    next_session_id: u32,
}

impl Inner {
    fn allocate_id(&mut self) -> u32 {
        let session_id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1).max(1);
        session_id
    }

    fn entry(&mut self, addr: SocketAddr) -> &mut ClientSession {
        let session_id = match self.sessions.get(&addr).map(|session| session.session_id) {
            Some(session_id) => session_id,
            None => self.allocate_id(),
        };
        self.entry_with_id(addr, session_id)
    }

    fn entry_with_id(&mut self, addr: SocketAddr, session_id: u32) -> &mut ClientSession {
        self.sessions.entry(addr).or_insert_with(|| {
            info!("Session {} created for {}", session_id, addr);
            ClientSession::new(session_id, addr)
        })
    }
}

/// Maps remote addresses to their sessions
///
/// Written by the dispatcher and read by the broadcaster. Every operation
/// takes the lock for its full duration, so `snapshot_targets` always sees a
/// consistent point-in-time view.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Creates an empty registry. Session IDs start from 1.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                next_session_id: 1,
            }),
        }
    }

    /// Returns the session for `addr`, creating a `Connecting` one if absent
    pub async fn lookup_or_create(&self, addr: SocketAddr) -> ClientSession {
        let mut inner = self.inner.write().await;
        let session = inner.entry(addr);
        session.apply(HandshakeEvent::Connected);
        session.clone()
    }

    /// Session id `addr` would be answered with, without storing a row
    ///
    /// Returns the existing id for a known address. Otherwise a fresh id is
    /// taken from the counter; ids reserved for exchanges that are later
    /// abandoned are simply skipped.
    pub async fn reserve_session_id(&self, addr: SocketAddr) -> u32 {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get(&addr) {
            return session.session_id;
        }
        inner.allocate_id()
    }

    /// Stores a `Connecting` session for `addr` under a reserved id
    ///
    /// An existing session keeps its id and phase.
    pub async fn record_connect(&self, addr: SocketAddr, session_id: u32) -> ClientSession {
        let mut inner = self.inner.write().await;
        let session = inner.entry_with_id(addr, session_id);
        session.apply(HandshakeEvent::Connected);
        session.clone()
    }

    /// Moves the session for `addr` to `Ready`, creating it first if absent
    pub async fn mark_ready(&self, addr: SocketAddr) -> ClientSession {
        let mut inner = self.inner.write().await;
        let session = inner.entry(addr);
        if !session.ready_for_snapshots() {
            info!("Session {} at {} is ready for snapshots", session.session_id, addr);
        }
        session.apply(HandshakeEvent::Completed);
        session.clone()
    }

    /// Addresses of every session currently marked ready
    pub async fn snapshot_targets(&self) -> Vec<SocketAddr> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|session| session.ready_for_snapshots())
            .map(|session| session.remote_address)
            .collect()
    }

    /// Phase of `addr`, `Unknown` when no session exists
    pub async fn phase(&self, addr: SocketAddr) -> SessionPhase {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&addr)
            .map_or(SessionPhase::Unknown, |session| session.phase)
    }

    pub async fn get(&self, addr: SocketAddr) -> Option<ClientSession> {
        self.inner.read().await.sessions.get(&addr).cloned()
    }

    /// Refreshes the activity timestamp of an existing session
    ///
    /// Returns false and creates nothing when the address is unknown.
    pub async fn touch(&self, addr: SocketAddr) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&addr) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes sessions that have been idle for longer than `timeout`
    ///
    /// Returns the evicted addresses so the caller can log them.
    pub async fn evict_idle(&self, timeout: Duration) -> Vec<SocketAddr> {
        let mut inner = self.inner.write().await;
        let idle: Vec<SocketAddr> = inner
            .sessions
            .values()
            .filter(|session| session.is_idle(timeout))
            .map(|session| session.remote_address)
            .collect();

        for addr in &idle {
            if let Some(session) = inner.sessions.remove(addr) {
                info!("Session {} at {} evicted after idling", session.session_id, addr);
            }
        }

        idle
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}
