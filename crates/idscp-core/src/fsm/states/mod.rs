//! Per-state transition tables.
//!
//! Each state is a stateless table `EventKey -> Transition`, written as a
//! match in its own module. All mutable data lives in [`FsmContext`], so
//! states are addressed by their [`FsmState`] tag and a self-loop is simply
//! [`Next::Stay`].

mod closed;
mod common;
mod established;
mod wait_for_dat_and_rat;
mod wait_for_dat_and_rat_verifier;
mod wait_for_hello;
mod wait_for_rat;
mod wait_for_rat_prover;
mod wait_for_rat_verifier;

use super::context::FsmContext;
use super::event::{Event, EventKey};
use super::{FsmState, Next};
use crate::errors::FsmError;

/// A transition function. Side effects go through the context; the returned
/// [`Next`] is committed by the dispatcher.
pub type Transition = fn(&mut FsmContext, Event) -> Result<Next, FsmError>;

/// Transition of `state` for `key`, `None` if the state does not handle it.
pub fn lookup(state: FsmState, key: EventKey) -> Option<Transition> {
    match state {
        FsmState::Closed => closed::transition(key),
        FsmState::WaitForHello => wait_for_hello::transition(key),
        FsmState::WaitForRat => wait_for_rat::transition(key),
        FsmState::WaitForRatProver => wait_for_rat_prover::transition(key),
        FsmState::WaitForRatVerifier => wait_for_rat_verifier::transition(key),
        FsmState::WaitForDatAndRat => wait_for_dat_and_rat::transition(key),
        FsmState::WaitForDatAndRatVerifier => wait_for_dat_and_rat_verifier::transition(key),
        FsmState::Established => established::transition(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idscp_proto::MessageKind;

    #[test]
    fn test_common_rows_everywhere_but_closed() {
        for state in FsmState::ALL.into_iter().filter(|s| *s != FsmState::Closed) {
            assert!(lookup(state, EventKey::Stop).is_some(), "{} lacks Stop", state);
            assert!(lookup(state, EventKey::Error).is_some(), "{} lacks Error", state);
            assert!(
                lookup(state, EventKey::Message(MessageKind::Close)).is_some(),
                "{} lacks Close",
                state
            );
            assert!(lookup(state, EventKey::StartHandshake).is_none());
        }
    }

    #[test]
    fn test_timeout_handled_until_established() {
        for state in FsmState::ALL.into_iter().filter(|s| *s != FsmState::Closed) {
            let handled = lookup(state, EventKey::Timeout).is_some();
            assert_eq!(handled, state != FsmState::Established, "{}", state);
        }
    }

    #[test]
    fn test_only_established_takes_data() {
        for state in FsmState::ALL {
            let handled = lookup(state, EventKey::Message(MessageKind::Data)).is_some();
            assert_eq!(handled, state == FsmState::Established, "{}", state);
        }
    }

    #[test]
    fn test_verifier_failure_closes_wherever_verifier_runs() {
        for state in [FsmState::WaitForRat, FsmState::WaitForRatVerifier] {
            assert!(lookup(state, EventKey::RatVerifierFailed).is_some(), "{}", state);
        }
    }

    #[test]
    fn test_closed_only_starts_or_stops() {
        assert!(lookup(FsmState::Closed, EventKey::StartHandshake).is_some());
        assert!(lookup(FsmState::Closed, EventKey::Stop).is_some());
        assert!(lookup(FsmState::Closed, EventKey::Message(MessageKind::Hello)).is_none());
        assert!(lookup(FsmState::Closed, EventKey::RatVerifierOk).is_none());
    }
}
