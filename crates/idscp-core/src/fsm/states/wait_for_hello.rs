//! Our hello is out, waiting for the peer's.

use idscp_proto::{CloseCause, MessageKind};
use tracing::debug;

use super::{common, Transition};
use crate::errors::FsmError;
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    match key {
        EventKey::Message(MessageKind::Hello) => Some(on_hello),
        _ => common::handshake_transition(key),
    }
}

fn on_hello(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    let Event::Message(msg) = event else {
        return Ok(Next::Stay);
    };
    let Some(hello) = msg.as_hello() else {
        return Ok(Next::Stay);
    };

    debug!(version = hello.version, "received IDSCP_HELLO");
    ctx.timers.handshake.cancel();

    if let Err(cause) = ctx.negotiate(hello) {
        return Ok(ctx.close_with(cause, "No match for RAT mechanism"));
    }

    let Some(validity) = ctx.verify_dat(&hello.dat_token()) else {
        return Ok(ctx.close_with(CloseCause::NoValidDat, "No valid DAT"));
    };
    debug!(?validity, "peer DAT accepted, start DAT timer");
    ctx.timers.dat.arm(validity);

    if let Some(next) = common::restart_verifier(ctx) {
        return Ok(next);
    }
    if let Some(next) = common::restart_prover(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForRat))
}
