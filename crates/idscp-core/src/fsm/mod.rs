//! The IDSCP2 connection state machine.
//!
//! [`Fsm::dispatch`] is the single entry point for every event. It runs under
//! the connection's lock, so one event is processed to completion before the
//! next one is looked at. Timers, RAT drivers and the channel reader only ever
//! enqueue events; nothing calls transition logic from their context.
//!
//! Dispatch order:
//! 1. a locked FSM (Closed after a handshake attempt) ignores everything,
//! 2. stale timer fires and RAT signals from replaced runs are dropped,
//! 3. the current state's table is consulted; a missing entry logs and stays,
//! 4. the transition runs and its `Next` is committed. Entering `Closed`
//!    locks the FSM and tears the connection down exactly once.

pub mod context;
pub mod event;
pub mod states;
pub mod timer;

use std::sync::Arc;

use bytes::Bytes;
use idscp_proto::IdscpMessage;
use idscp_transport::SecureChannel;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::config::Idscp2Configuration;
use crate::drivers::{DapsDriver, RatRegistry};
use crate::errors::{CloseReason, FsmError, Idscp2Error};

pub use context::{FsmContext, Notification};
pub use event::{Event, EventKey, InternalControlMessage, RatEvent, RatRole, RatSignal};
pub use timer::{Timer, TimerKind, Timers};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmState {
    Closed,
    WaitForHello,
    WaitForRat,
    WaitForRatProver,
    WaitForRatVerifier,
    WaitForDatAndRat,
    WaitForDatAndRatVerifier,
    Established,
}

impl FsmState {
    pub const ALL: [FsmState; 8] = [
        FsmState::Closed,
        FsmState::WaitForHello,
        FsmState::WaitForRat,
        FsmState::WaitForRatProver,
        FsmState::WaitForRatVerifier,
        FsmState::WaitForDatAndRat,
        FsmState::WaitForDatAndRatVerifier,
        FsmState::Established,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsmState::Closed => "STATE_CLOSED",
            FsmState::WaitForHello => "STATE_WAIT_FOR_HELLO",
            FsmState::WaitForRat => "STATE_WAIT_FOR_RAT",
            FsmState::WaitForRatProver => "STATE_WAIT_FOR_RAT_PROVER",
            FsmState::WaitForRatVerifier => "STATE_WAIT_FOR_RAT_VERIFIER",
            FsmState::WaitForDatAndRat => "STATE_WAIT_FOR_DAT_AND_RAT",
            FsmState::WaitForDatAndRatVerifier => "STATE_WAIT_FOR_DAT_AND_RAT_VERIFIER",
            FsmState::Established => "STATE_ESTABLISHED",
        }
    }
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stay,
    Goto(FsmState),
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Fsm {
    state: FsmState,
    locked: bool,
    ctx: FsmContext,
}

impl Fsm {
    /// Create an FSM in the initial `Closed` state. Nothing is sent until
    /// `StartHandshake` is dispatched.
    pub fn new(
        channel: Arc<dyn SecureChannel>,
        daps: Arc<dyn DapsDriver>,
        registry: RatRegistry,
        config: Idscp2Configuration,
        events: mpsc::UnboundedSender<Event>,
        runtime: Handle,
    ) -> Self {
        Self {
            state: FsmState::Closed,
            locked: false,
            ctx: FsmContext::new(channel, daps, registry, config, events, runtime),
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// True once `Closed` has been entered; the FSM never moves again.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn context(&self) -> &FsmContext {
        &self.ctx
    }

    pub(crate) fn context_mut(&mut self) -> &mut FsmContext {
        &mut self.ctx
    }

    /// Reason recorded when the FSM closed.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.ctx.final_close_reason()
    }

    /// Process one event to completion.
    ///
    /// An `Err` is a protocol violation; the state is left unchanged.
    pub fn dispatch(&mut self, event: Event) -> Result<(), FsmError> {
        if self.locked {
            trace!(state = %self.state, ?event, "FSM locked, ignoring event");
            return Ok(());
        }

        if !self.ctx.admit(&event) {
            return Ok(());
        }

        let Some(key) = event.key() else {
            debug!(state = %self.state, "ignoring message without body");
            return Ok(());
        };

        let Some(transition) = states::lookup(self.state, key) else {
            debug!(state = %self.state, event = ?key, "no transition available, stay in state");
            return Ok(());
        };

        trace!(state = %self.state, event = ?key, "running transition");
        match transition(&mut self.ctx, event)? {
            Next::Stay => {}
            Next::Goto(next) => self.enter(next),
        }
        Ok(())
    }

    fn enter(&mut self, next: FsmState) {
        if next != self.state {
            info!(from = %self.state, to = %next, "switched state");
        }
        self.state = next;

        if next == FsmState::Closed {
            self.locked = true;
            self.ctx.teardown();
        }
    }

    /// Send application data to the peer. Only accepted while established.
    pub fn send_data(&mut self, data: Bytes) -> Result<(), Idscp2Error> {
        if self.locked {
            return Err(Idscp2Error::Closed);
        }
        if self.state != FsmState::Established {
            return Err(Idscp2Error::NotEstablished);
        }
        self.ctx.send(IdscpMessage::data(data))?;
        Ok(())
    }

    /// Take notifications produced since the last call, in order.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.ctx.drain_outbox()
    }
}
