//! Hello exchanged, prover and verifier both running.

use idscp_proto::MessageKind;

use super::{common, Transition};
use crate::errors::FsmError;
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    Some(match key {
        EventKey::DatTimerExpired => dat_timer_expired,
        EventKey::RatProverOk => prover_ok,
        EventKey::RatVerifierOk => verifier_ok,
        EventKey::RatProverFailed => common::prover_failed,
        EventKey::RatVerifierFailed => common::verifier_failed,
        EventKey::RatProverMsg => common::relay_prover_msg,
        EventKey::RatVerifierMsg => common::relay_verifier_msg,
        EventKey::Message(MessageKind::DatExpired) => peer_dat_expired,
        EventKey::Message(MessageKind::RatProver) => common::delegate_to_verifier,
        EventKey::Message(MessageKind::RatVerifier) => common::delegate_to_prover,
        EventKey::Message(MessageKind::ReRat) => re_rat,
        _ => return common::handshake_transition(key),
    })
}

fn dat_timer_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    ctx.stop_rat_verifier();
    if let Some(next) = common::request_peer_dat(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForDatAndRat))
}

fn prover_ok(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    common::prover_accepted(ctx);
    Ok(Next::Goto(FsmState::WaitForRatVerifier))
}

fn verifier_ok(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    common::verifier_accepted(ctx);
    Ok(Next::Goto(FsmState::WaitForRatProver))
}

fn peer_dat_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::renew_dat_for_peer(ctx).unwrap_or(Next::Stay))
}

fn re_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::restart_prover(ctx).unwrap_or(Next::Stay))
}
