//! Our prover is done, waiting for the verifier's verdict on the peer.

use idscp_proto::MessageKind;

use super::{common, Transition};
use crate::errors::FsmError;
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    Some(match key {
        EventKey::DatTimerExpired => dat_timer_expired,
        EventKey::RatVerifierOk => verifier_ok,
        EventKey::RatVerifierFailed => common::verifier_failed,
        EventKey::RatVerifierMsg => common::relay_verifier_msg,
        EventKey::Message(MessageKind::DatExpired) => peer_dat_expired,
        EventKey::Message(MessageKind::RatProver) => common::delegate_to_verifier,
        EventKey::Message(MessageKind::ReRat) => re_rat,
        _ => return common::handshake_transition(key),
    })
}

fn dat_timer_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    ctx.stop_rat_verifier();
    if let Some(next) = common::request_peer_dat(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForDatAndRatVerifier))
}

fn verifier_ok(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    common::verifier_accepted(ctx);
    Ok(Next::Goto(FsmState::Established))
}

fn peer_dat_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::renew_dat_for_peer(ctx).unwrap_or(Next::Goto(FsmState::WaitForRat)))
}

fn re_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::restart_prover(ctx).unwrap_or(Next::Goto(FsmState::WaitForRat)))
}
