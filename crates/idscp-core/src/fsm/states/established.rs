//! Both sides attested. Application data flows; DAT expiry and the
//! re-attestation interval lead back into the handshake without closing.

use idscp_proto::{IdscpMessage, MessageKind};
use tracing::{debug, trace};

use super::{common, Transition};
use crate::errors::FsmError;
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey};
use crate::fsm::{FsmState, Next};

pub(super) fn transition(key: EventKey) -> Option<Transition> {
    Some(match key {
        EventKey::Message(MessageKind::Data) => on_data,
        EventKey::RepeatRat => repeat_rat,
        EventKey::DatTimerExpired => dat_timer_expired,
        EventKey::Message(MessageKind::ReRat) => re_rat,
        EventKey::Message(MessageKind::DatExpired) => peer_dat_expired,
        _ => return common::transition(key),
    })
}

fn on_data(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    if let Some(data) = event.into_payload() {
        trace!(len = data.len(), "received IDSCP_DATA");
        ctx.deliver(data);
    }
    Ok(Next::Stay)
}

fn repeat_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    debug!("re-attestation interval elapsed, send IDSCP_RE_RAT and restart RAT verifier");
    if ctx.send(IdscpMessage::re_rat("")).is_err() {
        return Ok(ctx.fail("Cannot send ReRat message"));
    }
    if let Some(next) = common::restart_verifier(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForRatVerifier))
}

fn dat_timer_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    ctx.timers.rat.cancel();
    if let Some(next) = common::request_peer_dat(ctx) {
        return Ok(next);
    }
    Ok(Next::Goto(FsmState::WaitForDatAndRatVerifier))
}

fn re_rat(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    debug!("received IDSCP_RE_RAT, restart RAT prover");
    Ok(common::restart_prover(ctx).unwrap_or(Next::Goto(FsmState::WaitForRatProver)))
}

fn peer_dat_expired(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(common::renew_dat_for_peer(ctx).unwrap_or(Next::Goto(FsmState::WaitForRatProver)))
}
