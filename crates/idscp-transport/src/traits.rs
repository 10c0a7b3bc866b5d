//! Secure channel contract used by the IDSCP2 connection.

use async_trait::async_trait;
use bytes::Bytes;

use crate::framing::FramingError;

/// A mutually authenticated, message-oriented channel to exactly one peer.
///
/// `send` is synchronous: it is called from inside FSM transitions and must
/// only hand the bytes to the channel's own writer, never wait on the network.
/// A failed `send` is reported to the caller, which decides whether the
/// connection survives it.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    /// Queue one complete message for the peer.
    fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next complete message.
    ///
    /// Returns `Ok(None)` once the channel is closed, locally or by the peer,
    /// after all messages queued before the close have been handed out.
    async fn recv(&self) -> Result<Option<Bytes>, TransportError>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Check if the channel still accepts outgoing messages
    fn is_connected(&self) -> bool;
}

/// Common transport error type
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Other error: {0}")]
    Other(String),
}
