//! Session state and correlation tokens
//!
//! A session is the logical connection between the host and one scanner.
//! This module holds the transport-independent parts:
//! - The session state machine
//! - Correlation token generation

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Session state
///
/// ```text
/// Idle ──connect──> Connecting ──ready──> Active ──> Disconnecting ──> Terminated
///                        │                                                 │
///                        └───────────── failed ──────────> Terminated      │
///                                                                          v
///                             Connecting <──connect── Reconnecting <───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, transport not opened yet
    Idle,

    /// Awaiting the transport handshake
    Connecting,

    /// Ready for commands
    Active,

    /// Cancelling outstanding requests and closing the transport
    Disconnecting,

    /// Finished; a session is never reused after this
    Terminated,

    /// Fresh session bound to an identity whose previous session was lost
    Reconnecting,
}

impl SessionState {
    /// Check if the state machine allows moving to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Terminated)
                | (Reconnecting, Connecting)
                | (Reconnecting, Terminated)
                | (Connecting, Active)
                | (Connecting, Terminated)
                | (Active, Disconnecting)
                | (Disconnecting, Terminated)
                | (Terminated, Reconnecting)
        )
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self,
                to: next,
            });
        }
        Ok(next)
    }

    /// Check if commands can be sent
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the session has ended
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Correlation token generator
///
/// Thread-safe and can be cloned cheaply (Arc internally). Tokens start at
/// 1 and skip the reserved notification token `0` when wrapping.
#[derive(Debug, Clone)]
pub struct TokenGenerator {
    inner: Arc<AtomicU16>,
}

impl TokenGenerator {
    /// First token handed out by a fresh generator
    pub const INITIAL_TOKEN: u16 = 1;

    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU16::new(Self::INITIAL_TOKEN)),
        }
    }

    /// Get next correlation token
    ///
    /// Wraps around after 65535, never returning 0.
    pub fn next_token(&self) -> u16 {
        loop {
            let token = self.inner.fetch_add(1, Ordering::AcqRel);
            if token != 0 {
                return token;
            }
        }
    }

    /// Reset counter (used in testing)
    #[cfg(test)]
    pub fn reset(&self) {
        self.inner.store(Self::INITIAL_TOKEN, Ordering::Release);
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}
