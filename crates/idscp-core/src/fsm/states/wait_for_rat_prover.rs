//! Verifier accepted the peer, our prover is still running.

use idscp_proto::{IdscpMessage, MessageKind};
use tracing::debug;

use super::{common, Transition};
use crate::errors::FsmError;
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    Some(match key {
        EventKey::RatProverOk => prover_ok,
        EventKey::RatProverFailed => common::prover_failed,
        EventKey::RatProverMsg => common::relay_prover_msg,
        EventKey::RepeatRat => repeat_rat,
        EventKey::DatTimerExpired => dat_timer_expired,
        EventKey::Message(MessageKind::DatExpired) => peer_dat_expired,
        EventKey::Message(MessageKind::RatVerifier) => common::delegate_to_prover,
        EventKey::Message(MessageKind::ReRat) => re_rat,
        _ => return common::handshake_transition(key),
    })
}

fn prover_ok(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    common::prover_accepted(ctx);
    Ok(Next::Goto(FsmState::Established))
}

fn repeat_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    debug!("re-attestation interval elapsed, send IDSCP_RE_RAT and restart RAT verifier");
    if ctx.send(IdscpMessage::re_rat("")).is_err() {
        return Ok(ctx.fail("Cannot send ReRat message"));
    }
    if let Some(next) = common::restart_verifier(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForRat))
}

fn dat_timer_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    ctx.timers.rat.cancel();
    if let Some(next) = common::request_peer_dat(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForDatAndRat))
}

fn peer_dat_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::renew_dat_for_peer(ctx).unwrap_or(Next::Stay))
}

fn re_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::restart_prover(ctx).unwrap_or(Next::Stay))
}
