//! Collaborator contracts: the DAT provider and the RAT prover/verifier drivers.
//!
//! Drivers run their own work on spawned tasks and talk back to the FSM only
//! through a [`RatDriverHandle`], which enqueues events into the connection's
//! dispatch queue. Neither `start` nor `stop` may block.

pub mod dummy;
pub mod registry;

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::{DapsError, RatDriverError};
use crate::fsm::event::{Event, RatEvent, RatRole, RatSignal};

pub use dummy::{DummyRatProver, DummyRatVerifier, NullDaps, DUMMY_MECHANISM};
pub use registry::RatRegistry;

// ============================================================================
// DAT provider
// ============================================================================

/// Issues our own dynamic attribute token and validates the peer's.
pub trait DapsDriver: Send + Sync {
    /// Fresh token to present to the peer.
    fn token(&self) -> Result<Bytes, DapsError>;

    /// Validate a peer token and return how long it stays valid.
    fn verify_token(&self, token: &[u8]) -> Result<Duration, DapsError>;
}

// ============================================================================
// RAT drivers
// ============================================================================

/// One attestation run, prover or verifier side.
pub trait RatDriver: Send {
    /// Launch the run. Results are reported through `handle`.
    fn start(&mut self, handle: RatDriverHandle) -> Result<(), RatDriverError>;

    /// Feed protocol bytes sent by the peer's opposite driver.
    fn delegate(&mut self, data: Bytes);

    /// Abort the run. Called at most once, also after a verdict.
    fn stop(&mut self);
}

/// Creates a fresh driver for every (re)start.
pub trait RatDriverFactory: Send + Sync {
    fn create(&self) -> Box<dyn RatDriver>;
}

impl<F> RatDriverFactory for F
where
    F: Fn() -> Box<dyn RatDriver> + Send + Sync,
{
    fn create(&self) -> Box<dyn RatDriver> {
        self()
    }
}

/// A driver's only way back into the FSM.
///
/// Every signal is tagged with the run id, so the dispatcher can discard
/// output of a run that has been stopped or replaced.
#[derive(Clone, Debug)]
pub struct RatDriverHandle {
    role: RatRole,
    run: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl RatDriverHandle {
    pub fn new(role: RatRole, run: u64, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { role, run, events }
    }

    pub fn role(&self) -> RatRole {
        self.role
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    /// Relay protocol bytes to the peer's opposite driver.
    pub fn send_message(&self, data: Bytes) {
        self.signal(RatSignal::Message(data));
    }

    pub fn succeeded(&self) {
        self.signal(RatSignal::Ok);
    }

    pub fn failed(&self) {
        self.signal(RatSignal::Failed);
    }

    fn signal(&self, signal: RatSignal) {
        // The connection is gone once the queue is closed.
        let _ = self.events.send(Event::Rat(RatEvent {
            role: self.role,
            run: self.run,
            signal,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = RatDriverHandle::new(RatRole::Prover, 7, tx);

        handle.send_message(Bytes::from_static(b"quote"));
        handle.succeeded();

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Rat(RatEvent {
                role: RatRole::Prover,
                run: 7,
                signal: RatSignal::Message(Bytes::from_static(b"quote")),
            })
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Rat(RatEvent {
                role: RatRole::Prover,
                run: 7,
                signal: RatSignal::Ok,
            })
        );
    }

    #[test]
    fn test_handle_survives_closed_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        RatDriverHandle::new(RatRole::Verifier, 1, tx).failed();
    }
}
