//! Events consumed by the FSM and the keys used to look up transitions.

use bytes::Bytes;
use idscp_proto::{IdscpMessage, MessageKind};

use super::timer::TimerKind;

/// Internal control signals, raised locally rather than by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalControlMessage {
    StartHandshake,
    Stop,
    Error,
    Timeout,
    DatTimerExpired,
    RepeatRat,
}

/// Side of the attestation a driver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatRole {
    Prover,
    Verifier,
}

impl std::fmt::Display for RatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RatRole::Prover => f.write_str("prover"),
            RatRole::Verifier => f.write_str("verifier"),
        }
    }
}

/// What a RAT driver reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatSignal {
    Ok,
    Failed,
    /// Protocol bytes to relay to the peer's opposite driver
    Message(Bytes),
}

/// A signal tagged with the driver run that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatEvent {
    pub role: RatRole,
    pub run: u64,
    pub signal: RatSignal,
}

/// Everything the dispatcher consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Control(InternalControlMessage),
    /// Raised by a [`super::timer::Timer`]; admitted only for the current arm.
    TimerFired { timer: TimerKind, generation: u64 },
    Rat(RatEvent),
    /// Decoded message from the peer
    Message(IdscpMessage),
}

/// Flat key space for the per-state transition tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    StartHandshake,
    Stop,
    Error,
    Timeout,
    DatTimerExpired,
    RepeatRat,
    RatProverOk,
    RatProverFailed,
    RatProverMsg,
    RatVerifierOk,
    RatVerifierFailed,
    RatVerifierMsg,
    Message(MessageKind),
}

impl From<InternalControlMessage> for EventKey {
    fn from(icm: InternalControlMessage) -> Self {
        match icm {
            InternalControlMessage::StartHandshake => EventKey::StartHandshake,
            InternalControlMessage::Stop => EventKey::Stop,
            InternalControlMessage::Error => EventKey::Error,
            InternalControlMessage::Timeout => EventKey::Timeout,
            InternalControlMessage::DatTimerExpired => EventKey::DatTimerExpired,
            InternalControlMessage::RepeatRat => EventKey::RepeatRat,
        }
    }
}

impl Event {
    /// Transition key of this event; `None` for an empty peer envelope.
    pub fn key(&self) -> Option<EventKey> {
        match self {
            Event::Control(icm) => Some((*icm).into()),
            Event::TimerFired { timer, .. } => Some(timer.signal().into()),
            Event::Rat(rat) => Some(match (rat.role, &rat.signal) {
                (RatRole::Prover, RatSignal::Ok) => EventKey::RatProverOk,
                (RatRole::Prover, RatSignal::Failed) => EventKey::RatProverFailed,
                (RatRole::Prover, RatSignal::Message(_)) => EventKey::RatProverMsg,
                (RatRole::Verifier, RatSignal::Ok) => EventKey::RatVerifierOk,
                (RatRole::Verifier, RatSignal::Failed) => EventKey::RatVerifierFailed,
                (RatRole::Verifier, RatSignal::Message(_)) => EventKey::RatVerifierMsg,
            }),
            Event::Message(msg) => msg.kind().map(EventKey::Message),
        }
    }

    /// Bytes carried by a RAT relay signal or a payload-bearing peer message.
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            Event::Rat(RatEvent {
                signal: RatSignal::Message(data),
                ..
            }) => Some(data),
            Event::Message(msg) => msg.into_payload(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_event_keys() {
        let fired = |timer| Event::TimerFired { timer, generation: 1 };
        assert_eq!(fired(TimerKind::Handshake).key(), Some(EventKey::Timeout));
        assert_eq!(fired(TimerKind::VerifierHandshake).key(), Some(EventKey::Timeout));
        assert_eq!(fired(TimerKind::Dat).key(), Some(EventKey::DatTimerExpired));
        assert_eq!(fired(TimerKind::Rat).key(), Some(EventKey::RepeatRat));
    }

    #[test]
    fn test_rat_event_keys() {
        let event = Event::Rat(RatEvent {
            role: RatRole::Verifier,
            run: 3,
            signal: RatSignal::Message(Bytes::from_static(b"nonce")),
        });
        assert_eq!(event.key(), Some(EventKey::RatVerifierMsg));
        assert_eq!(event.into_payload(), Some(Bytes::from_static(b"nonce")));
    }

    #[test]
    fn test_empty_message_has_no_key() {
        let event = Event::Message(IdscpMessage { message: None });
        assert_eq!(event.key(), None);
    }

    #[test]
    fn test_message_key() {
        let event = Event::Message(IdscpMessage::re_rat("refresh"));
        assert_eq!(event.key(), Some(EventKey::Message(MessageKind::ReRat)));
        assert_eq!(event.into_payload(), None);
    }
}
