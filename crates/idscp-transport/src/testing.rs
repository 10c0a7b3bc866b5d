//! In-memory secure channels for tests and demos.

use crate::traits::{SecureChannel, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type Inbound = tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>;

/// Mock channel that records what the connection sends and lets tests
/// inject what the peer "sent".
pub struct MockChannel {
    sent: Mutex<Vec<Bytes>>,
    inject: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Inbound,
    fail_sends: AtomicBool,
    closed: AtomicBool,
    packet_loss: f64,
}

impl MockChannel {
    /// Create a new mock channel
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            inject: Mutex::new(Some(tx)),
            inbound: tokio::sync::Mutex::new(rx),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            packet_loss: 0.0,
        }
    }

    /// Configure a random share of sends to fail (0.0 - 1.0)
    pub fn with_packet_loss(mut self, loss: f64) -> Self {
        self.packet_loss = loss.clamp(0.0, 1.0);
        self
    }

    /// Make every following send fail (or succeed again)
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Inject a message as if the peer had sent it
    pub fn inject_recv(&self, data: Bytes) {
        if let Some(tx) = self.inject.lock().as_ref() {
            let _ = tx.send(data);
        }
    }

    /// Get sent messages
    pub fn get_sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Drain sent messages
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Clear sent messages
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureChannel for MockChannel {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Other("send rejected".to_string()));
        }

        // Simulate packet loss
        let should_drop = {
            let mut rng = rand::thread_rng();
            rng.gen::<f64>() < self.packet_loss
        };
        if should_drop {
            return Err(TransportError::Other("Packet lost".to_string()));
        }

        self.sent.lock().push(data);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inject.lock().take();
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }
}

/// Loopback channel pair: what one end sends, the other end receives.
///
/// Closing either end closes both directions; messages already queued are
/// still delivered before the end of stream, like a TCP FIN.
pub struct LoopbackChannel {
    shared: Arc<LoopbackShared>,
    outgoing: Direction,
    inbound: Inbound,
}

#[derive(Clone, Copy)]
enum Direction {
    AToB,
    BToA,
}

struct LoopbackShared {
    a_to_b: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    b_to_a: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl LoopbackShared {
    fn sender(&self, direction: Direction) -> &Mutex<Option<mpsc::UnboundedSender<Bytes>>> {
        match direction {
            Direction::AToB => &self.a_to_b,
            Direction::BToA => &self.b_to_a,
        }
    }
}

impl LoopbackChannel {
    /// Create connected pair
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(LoopbackShared {
            a_to_b: Mutex::new(Some(a_tx)),
            b_to_a: Mutex::new(Some(b_tx)),
        });

        let a = Self {
            shared: shared.clone(),
            outgoing: Direction::AToB,
            inbound: tokio::sync::Mutex::new(a_rx),
        };
        let b = Self {
            shared,
            outgoing: Direction::BToA,
            inbound: tokio::sync::Mutex::new(b_rx),
        };
        (a, b)
    }
}

#[async_trait]
impl SecureChannel for LoopbackChannel {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        match self.shared.sender(self.outgoing).lock().as_ref() {
            Some(tx) => tx.send(data).map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::Disconnected),
        }
    }

    async fn recv(&self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    fn close(&self) {
        self.shared.a_to_b.lock().take();
        self.shared.b_to_a.lock().take();
    }

    fn is_connected(&self) -> bool {
        self.shared.sender(self.outgoing).lock().is_some()
    }
}
