//! Transitions shared by several states.

use idscp_proto::{CloseCause, IdscpMessage, MessageKind};
use tracing::{debug, error, info};

use super::Transition;
use crate::errors::{CloseReason, FsmError};
use crate::fsm::context::FsmContext;
use crate::fsm::event::{Event, EventKey, RatEvent, RatRole, RatSignal};
use crate::fsm::{FsmState, Next};

/// Rows present in every state but `Closed`.
pub(super) fn transition(key: EventKey) -> Option<Transition> {
    Some(match key {
        EventKey::Stop => on_stop,
        EventKey::Error => on_error,
        EventKey::Message(MessageKind::Close) => on_peer_close,
        _ => return None,
    })
}

/// Rows of a handshake state: the common ones plus the handshake timeout.
pub(super) fn handshake_transition(key: EventKey) -> Option<Transition> {
    match key {
        EventKey::Timeout => Some(on_timeout),
        _ => transition(key),
    }
}

fn on_stop(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    info!("local close requested");
    Ok(ctx.close_with(CloseCause::UserShutdown, "User close"))
}

fn on_error(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    Ok(ctx.fail("An internal control error occurred"))
}

fn on_timeout(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    info!("handshake timeout occurred");
    Ok(ctx.close_with(CloseCause::Timeout, "Handshake timeout"))
}

fn on_peer_close(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    let reason = match &event {
        Event::Message(msg) => msg
            .as_close()
            .map(|close| CloseReason::peer(close.cause(), close.cause_msg.clone())),
        _ => None,
    }
    .unwrap_or_else(|| CloseReason::peer(CloseCause::Error, "peer closed"));

    debug!(cause = %reason.cause, "received IDSCP_CLOSE");
    ctx.record_close(reason);
    Ok(Next::Goto(FsmState::Closed))
}

// ============================================================================
// Building blocks used by the state tables
// ============================================================================

/// Send a fresh DAT and restart the prover after the peer reported our DAT
/// expired.
pub(super) fn renew_dat_for_peer(ctx: &mut FsmContext) -> Option<Next> {
    debug!("received IDSCP_DAT_EXPIRED, send new DAT and restart RAT prover");
    if !ctx.send_dat() {
        return Some(ctx.fail("Cannot send DAT message"));
    }
    restart_prover(ctx)
}

/// Restart the prover; `Some(next)` means the connection must close.
pub(super) fn restart_prover(ctx: &mut FsmContext) -> Option<Next> {
    if !ctx.restart_rat_prover() {
        return Some(ctx.fail("Cannot run RAT prover"));
    }
    None
}

/// Restart the verifier; `Some(next)` means the connection must close.
pub(super) fn restart_verifier(ctx: &mut FsmContext) -> Option<Next> {
    if !ctx.restart_rat_verifier() {
        return Some(ctx.fail("Cannot run RAT verifier"));
    }
    None
}

/// Tell the peer our view of its DAT expired and give it time to send a new one.
pub(super) fn request_peer_dat(ctx: &mut FsmContext) -> Option<Next> {
    debug!("DAT timeout occurred, send IDSCP_DAT_EXPIRED");
    if ctx.send(IdscpMessage::dat_expired()).is_err() {
        return Some(ctx.fail("Cannot send DatExpired message"));
    }
    let delay = ctx.config().dat_expired_handshake_delay();
    ctx.timers.handshake.arm(delay);
    None
}

/// Validate the peer's new DAT and restart verification.
pub(super) fn accept_peer_dat(ctx: &mut FsmContext, event: Event) -> Option<Next> {
    ctx.timers.handshake.cancel();
    let token = event.into_payload().unwrap_or_default();
    let Some(validity) = ctx.verify_dat(&token) else {
        return Some(ctx.close_with(CloseCause::NoValidDat, "No valid DAT"));
    };
    ctx.timers.dat.arm(validity);
    restart_verifier(ctx)
}

fn relay(ctx: &mut FsmContext, event: Event, what: &str) -> Result<Next, FsmError> {
    let Some(msg) = relay_message(event) else {
        return Ok(Next::Stay);
    };
    if ctx.send(msg).is_err() {
        return Ok(ctx.fail(&format!("Cannot send {} message", what)));
    }
    Ok(Next::Stay)
}

fn relay_message(event: Event) -> Option<IdscpMessage> {
    match event {
        Event::Rat(RatEvent {
            role: RatRole::Prover,
            signal: RatSignal::Message(data),
            ..
        }) => Some(IdscpMessage::rat_prover(data)),
        Event::Rat(RatEvent {
            role: RatRole::Verifier,
            signal: RatSignal::Message(data),
            ..
        }) => Some(IdscpMessage::rat_verifier(data)),
        _ => None,
    }
}

pub(super) fn delegate_to_verifier(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    debug!("delegate received IDSCP_RAT_PROVER to RAT verifier");
    ctx.delegate_to_verifier(event.into_payload().unwrap_or_default())?;
    Ok(Next::Stay)
}

pub(super) fn delegate_to_prover(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    debug!("delegate received IDSCP_RAT_VERIFIER to RAT prover");
    ctx.delegate_to_prover(event.into_payload().unwrap_or_default())?;
    Ok(Next::Stay)
}

pub(super) fn prover_failed(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    error!("RAT prover failed");
    Ok(ctx.close_with(CloseCause::RatProverFailed, "RAT_PROVER failed"))
}

pub(super) fn verifier_failed(ctx: &mut FsmContext, _: Event) -> Result<Next, FsmError> {
    error!("RAT verifier failed");
    Ok(ctx.close_with(CloseCause::RatVerifierFailed, "RAT_VERIFIER failed"))
}

pub(super) fn relay_prover_msg(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    relay(ctx, event, "rat prover")
}

pub(super) fn relay_verifier_msg(ctx: &mut FsmContext, event: Event) -> Result<Next, FsmError> {
    relay(ctx, event, "rat verifier")
}

/// Verifier accepted the peer: stop its handshake timer and schedule the
/// next re-attestation.
pub(super) fn verifier_accepted(ctx: &mut FsmContext) {
    debug!("received RAT_VERIFIER OK, start RAT timer");
    ctx.timers.verifier_handshake.cancel();
    let interval = ctx.config().rat_timeout();
    ctx.timers.rat.arm(interval);
}

pub(super) fn prover_accepted(ctx: &mut FsmContext) {
    debug!("received RAT_PROVER OK");
    ctx.timers.prover_handshake.cancel();
}
