//! Per-connection mutable state shared by all transitions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use idscp_proto::v2::IdscpHello;
use idscp_proto::{CloseCause, IdscpMessage};
use idscp_transport::{SecureChannel, TransportError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::event::{Event, RatEvent, RatRole, RatSignal};
use super::timer::Timers;
use super::{FsmState, Next};
use crate::config::Idscp2Configuration;
use crate::drivers::{DapsDriver, RatDriver, RatDriverHandle, RatRegistry};
use crate::errors::{CloseReason, FsmError};

/// Produced by transitions and handed to the connection after the FSM lock
/// is released.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Application data from the peer
    Message(Bytes),
    /// The connection reached `Closed`
    Closed(CloseReason),
}

struct ActiveRun {
    run: u64,
    mechanism: String,
    driver: Box<dyn RatDriver>,
    concluded: bool,
}

pub struct FsmContext {
    channel: Arc<dyn SecureChannel>,
    daps: Arc<dyn DapsDriver>,
    registry: RatRegistry,
    config: Idscp2Configuration,
    events: mpsc::UnboundedSender<Event>,
    pub(crate) timers: Timers,
    prover: Option<ActiveRun>,
    verifier: Option<ActiveRun>,
    prover_mechanism: Option<String>,
    verifier_mechanism: Option<String>,
    next_run: u64,
    outbox: Vec<Notification>,
    close_reason: Option<CloseReason>,
    closed_with: Option<CloseReason>,
}

impl FsmContext {
    pub(crate) fn new(
        channel: Arc<dyn SecureChannel>,
        daps: Arc<dyn DapsDriver>,
        registry: RatRegistry,
        config: Idscp2Configuration,
        events: mpsc::UnboundedSender<Event>,
        runtime: Handle,
    ) -> Self {
        let timers = Timers::new(events.clone(), runtime);
        Self {
            channel,
            daps,
            registry,
            config,
            events,
            timers,
            prover: None,
            verifier: None,
            prover_mechanism: None,
            verifier_mechanism: None,
            next_run: 0,
            outbox: Vec::new(),
            close_reason: None,
            closed_with: None,
        }
    }

    pub fn config(&self) -> &Idscp2Configuration {
        &self.config
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn prover_mechanism(&self) -> Option<&str> {
        self.prover_mechanism.as_deref()
    }

    pub fn verifier_mechanism(&self) -> Option<&str> {
        self.verifier_mechanism.as_deref()
    }

    pub fn prover_run(&self) -> Option<u64> {
        self.prover.as_ref().map(|active| active.run)
    }

    pub fn verifier_run(&self) -> Option<u64> {
        self.verifier.as_ref().map(|active| active.run)
    }

    pub(crate) fn final_close_reason(&self) -> Option<&CloseReason> {
        self.closed_with.as_ref()
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Filter events that must not reach a transition: fires of canceled or
    /// re-armed timers, and RAT signals from a replaced run or arriving after
    /// the run's verdict.
    pub(crate) fn admit(&mut self, event: &Event) -> bool {
        match event {
            Event::TimerFired { timer, generation } => {
                let accepted = self.timers.get_mut(*timer).accept_fire(*generation);
                if !accepted {
                    debug!(timer = ?timer, generation, "discarding stale timer fire");
                }
                accepted
            }
            Event::Rat(RatEvent { role, run, signal }) => {
                let slot = match role {
                    RatRole::Prover => &mut self.prover,
                    RatRole::Verifier => &mut self.verifier,
                };
                match slot {
                    Some(active) if active.run == *run && !active.concluded => {
                        if matches!(signal, RatSignal::Ok | RatSignal::Failed) {
                            active.concluded = true;
                        }
                        true
                    }
                    _ => {
                        debug!(%role, run, "discarding signal of inactive RAT run");
                        false
                    }
                }
            }
            Event::Control(_) | Event::Message(_) => true,
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    pub(crate) fn send(&self, msg: IdscpMessage) -> Result<(), TransportError> {
        let kind = msg.kind();
        self.channel.send(msg.to_bytes()).map_err(|e| {
            warn!(message = ?kind, "cannot send IDSCP2 message: {}", e);
            e
        })
    }

    /// Best-effort close notice to the peer. Records the local close reason.
    pub(crate) fn send_close(&mut self, cause: CloseCause, message: &str) {
        debug!(%cause, "send IDSCP_CLOSE");
        let _ = self.send(IdscpMessage::close(message, cause));
        self.record_close(CloseReason::local(cause, message));
    }

    /// Send a fresh DAT. Returns false if none could be obtained or sent.
    pub(crate) fn send_dat(&self) -> bool {
        match self.daps.token() {
            Ok(token) => self.send(IdscpMessage::dat(token)).is_ok(),
            Err(e) => {
                error!("cannot obtain DAT: {}", e);
                false
            }
        }
    }

    pub(crate) fn own_dat(&self) -> Option<Bytes> {
        self.daps
            .token()
            .map_err(|e| error!("cannot obtain DAT: {}", e))
            .ok()
    }

    /// Validity of a peer DAT, `None` if it is rejected.
    pub(crate) fn verify_dat(&self, token: &[u8]) -> Option<Duration> {
        self.daps
            .verify_token(token)
            .map_err(|e| warn!("peer DAT rejected: {}", e))
            .ok()
    }

    // ========================================================================
    // Close bookkeeping
    // ========================================================================

    /// Remember why the connection is going down. The first reason wins.
    pub(crate) fn record_close(&mut self, reason: CloseReason) {
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
    }

    /// Record a local error and move to `Closed`.
    pub(crate) fn fail(&mut self, message: &str) -> Next {
        error!("{}, close IDSCP2 connection", message);
        self.record_close(CloseReason::local(CloseCause::Error, message));
        Next::Goto(FsmState::Closed)
    }

    /// Send a close notice with `cause` and move to `Closed`.
    pub(crate) fn close_with(&mut self, cause: CloseCause, message: &str) -> Next {
        self.send_close(cause, message);
        Next::Goto(FsmState::Closed)
    }

    // ========================================================================
    // RAT mechanisms and drivers
    // ========================================================================

    /// Pick prover and verifier mechanisms from the peer's hello.
    ///
    /// The prover runs the first mechanism the peer expects that we support;
    /// the verifier runs the first mechanism we expect that the peer supports.
    pub(crate) fn negotiate(&mut self, hello: &IdscpHello) -> Result<(), CloseCause> {
        let attestation = &self.config.attestation;

        let prover = hello
            .expected_rat_suite
            .iter()
            .find(|m| attestation.supported_rat_suite.contains(m))
            .cloned()
            .ok_or(CloseCause::NoRatMechanismMatchProver)?;

        let verifier = attestation
            .expected_rat_suite
            .iter()
            .find(|m| hello.supported_rat_suite.contains(m))
            .cloned()
            .ok_or(CloseCause::NoRatMechanismMatchVerifier)?;

        debug!(prover = %prover, verifier = %verifier, "negotiated RAT mechanisms");
        self.prover_mechanism = Some(prover);
        self.verifier_mechanism = Some(verifier);
        Ok(())
    }

    fn start_driver(&mut self, role: RatRole, mechanism: Option<String>) -> Option<ActiveRun> {
        let Some(mechanism) = mechanism else {
            error!(%role, "no RAT mechanism negotiated");
            return None;
        };

        let mut driver = match self.registry.create(role, &mechanism) {
            Ok(driver) => driver,
            Err(e) => {
                error!(%role, "{}", e);
                return None;
            }
        };

        self.next_run += 1;
        let run = self.next_run;
        if let Err(e) = driver.start(RatDriverHandle::new(role, run, self.events.clone())) {
            error!(%role, mechanism = %mechanism, "{}", e);
            return None;
        }

        debug!(%role, mechanism = %mechanism, run, "RAT driver started");
        Some(ActiveRun {
            run,
            mechanism,
            driver,
            concluded: false,
        })
    }

    /// Stop any running prover, start a new one and arm the prover-handshake timer.
    pub(crate) fn restart_rat_prover(&mut self) -> bool {
        self.stop_rat_prover();
        let mechanism = self.prover_mechanism.clone();
        match self.start_driver(RatRole::Prover, mechanism) {
            Some(active) => {
                self.prover = Some(active);
                let timeout = self.config.prover_handshake_timeout();
                self.timers.prover_handshake.arm(timeout);
                true
            }
            None => false,
        }
    }

    /// Stop any running verifier, start a new one and arm the verifier-handshake timer.
    pub(crate) fn restart_rat_verifier(&mut self) -> bool {
        self.stop_rat_verifier();
        let mechanism = self.verifier_mechanism.clone();
        match self.start_driver(RatRole::Verifier, mechanism) {
            Some(active) => {
                self.verifier = Some(active);
                let timeout = self.config.verifier_handshake_timeout();
                self.timers.verifier_handshake.arm(timeout);
                true
            }
            None => false,
        }
    }

    pub(crate) fn stop_rat_prover(&mut self) {
        self.timers.prover_handshake.cancel();
        if let Some(mut active) = self.prover.take() {
            debug!(mechanism = %active.mechanism, run = active.run, "stopping RAT prover");
            active.driver.stop();
        }
    }

    pub(crate) fn stop_rat_verifier(&mut self) {
        self.timers.verifier_handshake.cancel();
        if let Some(mut active) = self.verifier.take() {
            debug!(mechanism = %active.mechanism, run = active.run, "stopping RAT verifier");
            active.driver.stop();
        }
    }

    /// Hand peer prover data to the local verifier.
    pub(crate) fn delegate_to_verifier(&mut self, data: Bytes) -> Result<(), FsmError> {
        match self.verifier.as_mut() {
            Some(active) => {
                active.driver.delegate(data);
                Ok(())
            }
            None => Err(FsmError::ProtocolViolation("RAT verifier driver not available")),
        }
    }

    /// Hand peer verifier data to the local prover.
    pub(crate) fn delegate_to_prover(&mut self, data: Bytes) -> Result<(), FsmError> {
        match self.prover.as_mut() {
            Some(active) => {
                active.driver.delegate(data);
                Ok(())
            }
            None => Err(FsmError::ProtocolViolation("RAT prover driver not available")),
        }
    }

    // ========================================================================
    // Delivery and teardown
    // ========================================================================

    pub(crate) fn deliver(&mut self, data: Bytes) {
        self.outbox.push(Notification::Message(data));
    }

    pub(crate) fn drain_outbox(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    /// Release everything on entry to `Closed`. Runs once, the FSM is locked
    /// right before.
    pub(crate) fn teardown(&mut self) {
        self.timers.cancel_all();
        self.stop_rat_prover();
        self.stop_rat_verifier();
        self.channel.close();

        let reason = self
            .close_reason
            .take()
            .unwrap_or_else(|| CloseReason::local(CloseCause::Error, "connection closed"));
        debug!(reason = %reason, "IDSCP2 connection closed");
        self.closed_with = Some(reason.clone());
        self.outbox.push(Notification::Closed(reason));
    }
}
