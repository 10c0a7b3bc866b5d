//! Peer DAT expired and we wait for a new one; our prover is still running.

use idscp_proto::MessageKind;

use super::{common, Transition};
use crate::errors::FsmError;
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    Some(match key {
        EventKey::Message(MessageKind::Dat) => on_dat,
        EventKey::RatProverOk => prover_ok,
        EventKey::RatProverFailed => common::prover_failed,
        EventKey::RatProverMsg => common::relay_prover_msg,
        EventKey::Message(MessageKind::DatExpired) => peer_dat_expired,
        EventKey::Message(MessageKind::RatVerifier) => common::delegate_to_prover,
        EventKey::Message(MessageKind::ReRat) => re_rat,
        _ => return common::handshake_transition(key),
    })
}

fn on_dat(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    if let Some(next) = common::accept_peer_dat(ctx, event) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForRat))
}

fn prover_ok(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    common::prover_accepted(ctx);
    Ok(Next::Goto(FsmState::WaitForDatAndRatVerifier))
}

fn peer_dat_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::renew_dat_for_peer(ctx).unwrap_or(Next::Stay))
}

fn re_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::restart_prover(ctx).unwrap_or(Next::Stay))
}
