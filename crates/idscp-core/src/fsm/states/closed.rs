//! `Closed` before the handshake. Once re-entered the FSM is locked and this
//! table is never consulted again.

use idscp_proto::{CloseCause, IdscpMessage};
use tracing::debug;

use super::Transition;
use crate::errors::{CloseReason, FsmError};
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    match key {
        EventKey::StartHandshake => Some(start_handshake),
        EventKey::Stop => Some(stop),
        _ => None,
    }
}

fn start_handshake(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    debug!("start IDSCP2 handshake, get DAT from DAT driver");
    let Some(dat) = ctx.own_dat() else {
        return Ok(ctx.fail("Cannot obtain DAT"));
    };

    let attestation = &ctx.config().attestation;
    let hello = IdscpMessage::hello(
        dat,
        &attestation.supported_rat_suite,
        &attestation.expected_rat_suite,
    );
    if ctx.send(hello).is_err() {
        return Ok(ctx.fail("Cannot send IDSCP_HELLO"));
    }

    let timeout = ctx.config().handshake_timeout();
    ctx.timers.handshake.arm(timeout);
    Ok(Next::Goto(FsmState::WaitForHello))
}

fn stop(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    debug!("stopped before handshake");
    ctx.record_close(CloseReason::local(CloseCause::UserShutdown, "User close"));
    Ok(Next::Goto(FsmState::Closed))
}
