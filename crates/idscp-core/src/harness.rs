//! Test harness for IDSCP2 core functionality.
//!
//! Provides scripted drivers, an [`FsmRig`] that runs an FSM against a
//! [`MockChannel`] without any background pump (tests decide exactly when
//! queued timer and driver events are dispatched), and helpers that connect
//! two full connections over a loopback channel.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use idscp_proto::IdscpMessage;
use idscp_transport::testing::{LoopbackChannel, MockChannel};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::Idscp2Configuration;
use crate::connection::Idscp2Connection;
use crate::drivers::{
    DapsDriver, NullDaps, RatDriver, RatDriverFactory, RatDriverHandle, RatRegistry,
    DUMMY_MECHANISM,
};
use crate::errors::{DapsError, FsmError, Idscp2Error, RatDriverError};
use crate::fsm::{Event, Fsm, FsmState, InternalControlMessage, Notification};

// ============================================================================
// DAT drivers
// ============================================================================

/// Issues a token but rejects every peer token.
#[derive(Debug, Default, Clone)]
pub struct RejectingDaps;

impl DapsDriver for RejectingDaps {
    fn token(&self) -> Result<Bytes, DapsError> {
        Ok(Bytes::from_static(b"token"))
    }

    fn verify_token(&self, _token: &[u8]) -> Result<Duration, DapsError> {
        Err(DapsError::Rejected("untrusted issuer".to_string()))
    }
}

/// Cannot issue a token at all.
#[derive(Debug, Default, Clone)]
pub struct UnavailableDaps;

impl DapsDriver for UnavailableDaps {
    fn token(&self) -> Result<Bytes, DapsError> {
        Err(DapsError::Unavailable("DAPS unreachable".to_string()))
    }

    fn verify_token(&self, _token: &[u8]) -> Result<Duration, DapsError> {
        Err(DapsError::Unavailable("DAPS unreachable".to_string()))
    }
}

// ============================================================================
// Recording RAT driver
// ============================================================================

#[derive(Default)]
struct DriverLogInner {
    starts: usize,
    stops: usize,
    delegated: Vec<Bytes>,
    handle: Option<RatDriverHandle>,
    fail_start: bool,
}

/// Shared record of everything the FSM asked drivers of one role to do.
#[derive(Clone, Default)]
pub struct DriverLog {
    inner: Arc<Mutex<DriverLogInner>>,
}

impl DriverLog {
    pub fn starts(&self) -> usize {
        self.inner.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.inner.lock().stops
    }

    pub fn delegated(&self) -> Vec<Bytes> {
        self.inner.lock().delegated.clone()
    }

    /// Make every following start fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.inner.lock().fail_start = fail;
    }

    /// Handle of the most recently started run.
    pub fn handle(&self) -> Option<RatDriverHandle> {
        self.inner.lock().handle.clone()
    }

    pub fn succeed(&self) {
        if let Some(handle) = self.handle() {
            handle.succeeded();
        }
    }

    pub fn fail(&self) {
        if let Some(handle) = self.handle() {
            handle.failed();
        }
    }

    pub fn send(&self, data: &'static [u8]) {
        if let Some(handle) = self.handle() {
            handle.send_message(Bytes::from_static(data));
        }
    }
}

/// Factory for [`RecordingDriver`]s sharing one [`DriverLog`].
#[derive(Clone, Default)]
pub struct RecordingRatFactory {
    log: DriverLog,
}

impl RecordingRatFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> DriverLog {
        self.log.clone()
    }
}

impl RatDriverFactory for RecordingRatFactory {
    fn create(&self) -> Box<dyn RatDriver> {
        Box::new(RecordingDriver {
            log: self.log.clone(),
        })
    }
}

/// Driver that does nothing by itself; tests script its verdicts through
/// the captured handle.
pub struct RecordingDriver {
    log: DriverLog,
}

impl RatDriver for RecordingDriver {
    fn start(&mut self, handle: RatDriverHandle) -> Result<(), RatDriverError> {
        let mut log = self.log.inner.lock();
        if log.fail_start {
            return Err(RatDriverError::StartFailed("scripted failure".to_string()));
        }
        log.starts += 1;
        log.handle = Some(handle);
        Ok(())
    }

    fn delegate(&mut self, data: Bytes) {
        self.log.inner.lock().delegated.push(data);
    }

    fn stop(&mut self) {
        self.log.inner.lock().stops += 1;
    }
}

// ============================================================================
// FSM rig
// ============================================================================

/// An FSM wired to a mock channel and recording drivers.
///
/// Must be created inside a tokio runtime (timers spawn on it).
pub struct FsmRig {
    pub fsm: Fsm,
    pub channel: Arc<MockChannel>,
    pub prover: DriverLog,
    pub verifier: DriverLog,
    events: mpsc::UnboundedReceiver<Event>,
    notifications: Vec<Notification>,
}

impl FsmRig {
    pub fn new() -> Self {
        Self::with(Idscp2Configuration::default(), Arc::new(NullDaps::new()))
    }

    pub fn with(config: Idscp2Configuration, daps: Arc<dyn DapsDriver>) -> Self {
        let prover = RecordingRatFactory::new();
        let verifier = RecordingRatFactory::new();
        let mut registry = RatRegistry::new();
        registry.register_prover(DUMMY_MECHANISM, prover.clone());
        registry.register_verifier(DUMMY_MECHANISM, verifier.clone());

        let channel = Arc::new(MockChannel::new());
        let (tx, events) = mpsc::unbounded_channel();
        let fsm = Fsm::new(channel.clone(), daps, registry, config, tx, Handle::current());

        Self {
            fsm,
            channel,
            prover: prover.log(),
            verifier: verifier.log(),
            events,
            notifications: Vec::new(),
        }
    }

    pub fn state(&self) -> FsmState {
        self.fsm.state()
    }

    pub fn dispatch(&mut self, event: Event) -> Result<(), FsmError> {
        let result = self.fsm.dispatch(event);
        self.notifications.extend(self.fsm.drain_notifications());
        result
    }

    pub fn control(&mut self, icm: InternalControlMessage) -> Result<(), FsmError> {
        self.dispatch(Event::Control(icm))
    }

    /// Deliver a message as if the peer had sent it.
    pub fn peer(&mut self, msg: IdscpMessage) -> Result<(), FsmError> {
        self.dispatch(Event::Message(msg))
    }

    /// Dispatch every event queued by timers and drivers so far.
    pub fn pump(&mut self) -> Vec<FsmError> {
        let mut errors = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Err(e) = self.dispatch(event) {
                errors.push(e);
            }
        }
        errors
    }

    /// Wait for the next queued event (e.g. a timer under paused time) and
    /// dispatch it.
    pub async fn pump_next(&mut self) -> Result<(), FsmError> {
        match self.events.recv().await {
            Some(event) => self.dispatch(event),
            None => Ok(()),
        }
    }

    /// Messages sent to the peer since the last call.
    pub fn sent(&self) -> Vec<IdscpMessage> {
        self.channel
            .take_sent()
            .iter()
            .filter_map(|frame| IdscpMessage::from_bytes(frame).ok())
            .collect()
    }

    pub fn notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Hello as sent by a peer running the dummy mechanisms.
    pub fn peer_hello() -> IdscpMessage {
        let suite = vec![DUMMY_MECHANISM.to_string()];
        IdscpMessage::hello(Bytes::from_static(b"peer-dat"), &suite, &suite)
    }

    /// Walk the handshake to `target` and forget what was sent on the way.
    pub fn drive_to(&mut self, target: FsmState) {
        let result = match target {
            FsmState::Closed => self.control(InternalControlMessage::Stop),
            FsmState::WaitForHello => self.control(InternalControlMessage::StartHandshake),
            FsmState::WaitForRat => {
                self.drive_to(FsmState::WaitForHello);
                self.peer(Self::peer_hello())
            }
            FsmState::WaitForRatVerifier => {
                self.drive_to(FsmState::WaitForRat);
                self.prover.succeed();
                self.pump_ok()
            }
            FsmState::WaitForRatProver => {
                self.drive_to(FsmState::WaitForRat);
                self.verifier.succeed();
                self.pump_ok()
            }
            FsmState::Established => {
                self.drive_to(FsmState::WaitForRatVerifier);
                self.verifier.succeed();
                self.pump_ok()
            }
            FsmState::WaitForDatAndRat => {
                self.drive_to(FsmState::WaitForRat);
                self.control(InternalControlMessage::DatTimerExpired)
            }
            FsmState::WaitForDatAndRatVerifier => {
                self.drive_to(FsmState::WaitForRatVerifier);
                self.control(InternalControlMessage::DatTimerExpired)
            }
        };

        assert!(result.is_ok(), "driving to {} failed: {:?}", target, result);
        assert_eq!(self.state(), target);
        self.channel.clear_sent();
        self.notifications.clear();
    }

    fn pump_ok(&mut self) -> Result<(), FsmError> {
        match self.pump().pop() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for FsmRig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Connected pair
// ============================================================================

/// Two connections over a loopback channel, using [`NullDaps`] and the dummy
/// RAT drivers. The handshake runs in the background.
pub fn spawn_pair(
    config: Idscp2Configuration,
) -> Result<(Idscp2Connection, Idscp2Connection), Idscp2Error> {
    let (a, b) = LoopbackChannel::pair();
    let left = Idscp2Connection::spawn(
        Arc::new(a),
        Arc::new(NullDaps::new()),
        RatRegistry::with_dummy_drivers(),
        config.clone(),
    )?;
    let right = Idscp2Connection::spawn(
        Arc::new(b),
        Arc::new(NullDaps::new()),
        RatRegistry::with_dummy_drivers(),
        config,
    )?;
    Ok((left, right))
}

/// Spawn a pair and wait until both sides are established.
pub async fn run_handshake_flow(
    config: Idscp2Configuration,
) -> Result<(Idscp2Connection, Idscp2Connection), Idscp2Error> {
    let (left, right) = spawn_pair(config)?;
    left.established().await?;
    right.established().await?;
    Ok((left, right))
}
