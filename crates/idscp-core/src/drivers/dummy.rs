//! Drivers without any security value, for tests, demos and interop checks.

use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{DapsDriver, RatDriver, RatDriverHandle};
use crate::errors::{DapsError, RatDriverError};

/// Mechanism id of the dummy RAT drivers.
pub const DUMMY_MECHANISM: &str = "Dummy";

const DUMMY_TOKEN: &[u8] = b"INVALID_TOKEN";

// ============================================================================
// DAT
// ============================================================================

/// Issues a fixed token and accepts any non-empty peer token.
#[derive(Debug, Clone)]
pub struct NullDaps {
    token: Bytes,
    validity: Duration,
}

impl NullDaps {
    pub fn new() -> Self {
        Self {
            token: Bytes::from_static(DUMMY_TOKEN),
            validity: Duration::from_secs(3600),
        }
    }

    /// Validity reported for accepted peer tokens
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }
}

impl Default for NullDaps {
    fn default() -> Self {
        Self::new()
    }
}

impl DapsDriver for NullDaps {
    fn token(&self) -> Result<Bytes, DapsError> {
        Ok(self.token.clone())
    }

    fn verify_token(&self, token: &[u8]) -> Result<Duration, DapsError> {
        if token.is_empty() {
            return Err(DapsError::Rejected("empty token".to_string()));
        }
        Ok(self.validity)
    }
}

// ============================================================================
// RAT
// ============================================================================

/// Shared plumbing: a spawned task fed with delegated peer messages.
#[derive(Default)]
struct DummyRun {
    inbox: Option<mpsc::UnboundedSender<Bytes>>,
    task: Option<JoinHandle<()>>,
}

impl DummyRun {
    fn spawn<F, Fut>(&mut self, body: F) -> Result<(), RatDriverError>
    where
        F: FnOnce(mpsc::UnboundedReceiver<Bytes>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| RatDriverError::StartFailed(format!("no tokio runtime: {}", e)))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inbox = Some(tx);
        self.task = Some(runtime.spawn(body(rx)));
        Ok(())
    }

    fn delegate(&self, data: Bytes) {
        if let Some(inbox) = &self.inbox {
            let _ = inbox.send(data);
        }
    }

    fn stop(&mut self) {
        self.inbox = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Sends one message to the verifier and succeeds once it is answered.
#[derive(Default)]
pub struct DummyRatProver {
    run: DummyRun,
}

impl DummyRatProver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RatDriver for DummyRatProver {
    fn start(&mut self, handle: RatDriverHandle) -> Result<(), RatDriverError> {
        self.run.spawn(|mut inbox| async move {
            handle.send_message(Bytes::from_static(b"test"));
            match inbox.recv().await {
                Some(answer) => {
                    debug!(run = handle.run(), len = answer.len(), "dummy prover got verifier answer");
                    handle.succeeded();
                }
                None => debug!(run = handle.run(), "dummy prover stopped"),
            }
        })
    }

    fn delegate(&mut self, data: Bytes) {
        self.run.delegate(data);
    }

    fn stop(&mut self) {
        self.run.stop();
    }
}

/// Waits for the prover's message, answers it and succeeds.
#[derive(Default)]
pub struct DummyRatVerifier {
    run: DummyRun,
}

impl DummyRatVerifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RatDriver for DummyRatVerifier {
    fn start(&mut self, handle: RatDriverHandle) -> Result<(), RatDriverError> {
        self.run.spawn(|mut inbox| async move {
            match inbox.recv().await {
                Some(evidence) => {
                    debug!(run = handle.run(), len = evidence.len(), "dummy verifier got evidence");
                    handle.send_message(Bytes::from_static(b"test"));
                    handle.succeeded();
                }
                None => debug!(run = handle.run(), "dummy verifier stopped"),
            }
        })
    }

    fn delegate(&mut self, data: Bytes) {
        self.run.delegate(data);
    }

    fn stop(&mut self) {
        self.run.stop();
    }
}
