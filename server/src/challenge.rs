//! Challenge tokens handed out in reply to `getchallenge`.
//!
//! Tokens come straight from the operating system's CSPRNG on every call.
//! There is no fallback generator: if the OS cannot supply randomness the
//! error is returned to the caller and treated as fatal by the server.

use rand::rngs::OsRng;
use rand::RngCore;
use shared::ServerMessage;

/// The OS randomness source failed.
#[derive(Debug, thiserror::Error)]
#[error("failed to source challenge randomness: {0}")]
pub struct ChallengeError(#[source] rand::Error);

/// Produces unpredictable 64-bit challenge tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChallengeGenerator;

impl ChallengeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Draws a fresh token. Never cached or reused.
    pub fn next_token(&self) -> Result<u64, ChallengeError> {
        let mut bytes = [0u8; 8];
        OsRng.try_fill_bytes(&mut bytes).map_err(ChallengeError)?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Draws a token and wraps it in a `challengeResponse` message.
    pub fn next_response(&self) -> Result<ServerMessage, ChallengeError> {
        Ok(ServerMessage::ChallengeResponse {
            challenge: self.next_token()?,
        })
    }
}
