//! Error types for IDSCP2 core.
//!
//! Every layer has its own `thiserror` enum. Applications only see
//! [`Idscp2Error`] from the connection API and [`CloseReason`] through the
//! close notification; everything else stays inside the FSM.

use idscp_proto::CloseCause;
use idscp_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;

// ============================================================================
// Application-facing errors
// ============================================================================

/// Errors returned by [`crate::Idscp2Connection`].
#[derive(Debug, Error)]
pub enum Idscp2Error {
    /// Application data is only accepted in the established state
    #[error("connection is not established")]
    NotEstablished,

    /// The connection has been closed and will not reopen
    #[error("connection is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ============================================================================
// FSM errors
// ============================================================================

/// Errors raised by a transition that must not be silently ignored.
///
/// They never move the FSM; the connection reports them to its listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    /// The peer sent something the current state cannot service,
    /// e.g. attestation data while no driver is running.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

// ============================================================================
// Driver errors
// ============================================================================

/// Errors from the DAT (token) driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DapsError {
    #[error("DAT unavailable: {0}")]
    Unavailable(String),

    #[error("DAT rejected: {0}")]
    Rejected(String),
}

/// Errors from starting a RAT driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatDriverError {
    #[error("no RAT driver registered for mechanism {0:?}")]
    UnknownMechanism(String),

    #[error("RAT driver failed to start: {0}")]
    StartFailed(String),
}

// ============================================================================
// Close reason
// ============================================================================

/// Which side ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    Local,
    Peer,
}

/// Why a connection reached `Closed`, reported once through `on_close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub initiator: CloseInitiator,
    pub cause: CloseCause,
    pub message: String,
}

impl CloseReason {
    pub fn local(cause: CloseCause, message: impl Into<String>) -> Self {
        Self {
            initiator: CloseInitiator::Local,
            cause,
            message: message.into(),
        }
    }

    pub fn peer(cause: CloseCause, message: impl Into<String>) -> Self {
        Self {
            initiator: CloseInitiator::Peer,
            cause,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.initiator {
            CloseInitiator::Local => "local",
            CloseInitiator::Peer => "peer",
        };
        write!(f, "{} close ({}): {}", side, self.cause, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_display() {
        let reason = CloseReason::peer(CloseCause::RatVerifierFailed, "untrusted");
        assert_eq!(
            reason.to_string(),
            "peer close (RAT_VERIFIER_FAILED): untrusted"
        );
    }

    #[test]
    fn test_transport_error_converts() {
        let err: Idscp2Error = TransportError::Disconnected.into();
        assert!(matches!(err, Idscp2Error::Transport(_)));
    }
}
