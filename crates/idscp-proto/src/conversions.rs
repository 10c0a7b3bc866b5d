//! Constructors and classification for IDSCP2 messages.

use bytes::Bytes;
use prost::Message;
use thiserror::Error;

use crate::v2::idscp_close::CloseCause;
use crate::v2::idscp_message::Message as Body;
use crate::v2::*;
use crate::IDSCP_PROTOCOL_VERSION;

/// Errors raised while turning raw channel bytes into an [`IdscpMessage`].
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed IDSCP2 message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("IDSCP2 message carries no body")]
    EmptyMessage,
}

/// Discriminant of the message body, used as the message half of the FSM event key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    Close,
    DatExpired,
    Dat,
    ReRat,
    RatProver,
    RatVerifier,
    Data,
}

// ============================================================================
// Constructors
// ============================================================================

impl IdscpMessage {
    fn wrap(body: Body) -> Self {
        Self { message: Some(body) }
    }

    /// Build the opening `IdscpHello`.
    pub fn hello(dat: Bytes, supported_rat_suite: &[String], expected_rat_suite: &[String]) -> Self {
        Self::wrap(Body::IdscpHello(IdscpHello {
            version: IDSCP_PROTOCOL_VERSION,
            dynamic_attribute_token: Some(IdscpDat { token: dat }),
            supported_rat_suite: supported_rat_suite.to_vec(),
            expected_rat_suite: expected_rat_suite.to_vec(),
        }))
    }

    pub fn close(cause_msg: impl Into<String>, cause: CloseCause) -> Self {
        let mut close = IdscpClose {
            cause_code: 0,
            cause_msg: cause_msg.into(),
        };
        close.set_cause_code(cause);
        Self::wrap(Body::IdscpClose(close))
    }

    pub fn dat(token: Bytes) -> Self {
        Self::wrap(Body::IdscpDat(IdscpDat { token }))
    }

    pub fn dat_expired() -> Self {
        Self::wrap(Body::IdscpDatExpired(IdscpDatExpired {}))
    }

    pub fn re_rat(cause: impl Into<String>) -> Self {
        Self::wrap(Body::IdscpReRat(IdscpReRat {
            cause: cause.into(),
        }))
    }

    pub fn rat_prover(data: Bytes) -> Self {
        Self::wrap(Body::IdscpRatProver(IdscpRatProver { data }))
    }

    pub fn rat_verifier(data: Bytes) -> Self {
        Self::wrap(Body::IdscpRatVerifier(IdscpRatVerifier { data }))
    }

    pub fn data(data: Bytes) -> Self {
        Self::wrap(Body::IdscpData(IdscpData { data }))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Kind of the carried body, `None` for an empty envelope.
    pub fn kind(&self) -> Option<MessageKind> {
        self.message.as_ref().map(|body| match body {
            Body::IdscpHello(_) => MessageKind::Hello,
            Body::IdscpClose(_) => MessageKind::Close,
            Body::IdscpDatExpired(_) => MessageKind::DatExpired,
            Body::IdscpDat(_) => MessageKind::Dat,
            Body::IdscpReRat(_) => MessageKind::ReRat,
            Body::IdscpRatProver(_) => MessageKind::RatProver,
            Body::IdscpRatVerifier(_) => MessageKind::RatVerifier,
            Body::IdscpData(_) => MessageKind::Data,
        })
    }

    /// Opaque payload of RAT relay and application data messages.
    pub fn payload(&self) -> Option<&Bytes> {
        match self.message.as_ref()? {
            Body::IdscpRatProver(m) => Some(&m.data),
            Body::IdscpRatVerifier(m) => Some(&m.data),
            Body::IdscpData(m) => Some(&m.data),
            Body::IdscpDat(m) => Some(&m.token),
            _ => None,
        }
    }

    /// Consume the message and return its opaque payload.
    pub fn into_payload(self) -> Option<Bytes> {
        match self.message? {
            Body::IdscpRatProver(m) => Some(m.data),
            Body::IdscpRatVerifier(m) => Some(m.data),
            Body::IdscpData(m) => Some(m.data),
            Body::IdscpDat(m) => Some(m.token),
            _ => None,
        }
    }

    pub fn as_hello(&self) -> Option<&IdscpHello> {
        match self.message.as_ref()? {
            Body::IdscpHello(hello) => Some(hello),
            _ => None,
        }
    }

    pub fn as_close(&self) -> Option<&IdscpClose> {
        match self.message.as_ref()? {
            Body::IdscpClose(close) => Some(close),
            _ => None,
        }
    }

    // ========================================================================
    // Wire
    // ========================================================================

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    /// Decode one message from a complete frame.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, ProtoError> {
        let msg = Self::decode(frame)?;
        if msg.message.is_none() {
            return Err(ProtoError::EmptyMessage);
        }
        Ok(msg)
    }
}

impl IdscpHello {
    /// Token carried in the hello, empty if the peer sent none.
    pub fn dat_token(&self) -> Bytes {
        self.dynamic_attribute_token
            .as_ref()
            .map(|dat| dat.token.clone())
            .unwrap_or_default()
    }
}

impl IdscpClose {
    /// Cause of the close. Values this side does not know map to `Error`.
    pub fn cause(&self) -> CloseCause {
        CloseCause::try_from(self.cause_code).unwrap_or(CloseCause::Error)
    }
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_close_carries_cause() {
        let msg = IdscpMessage::close("Handshake timeout", CloseCause::Timeout);
        let decoded = IdscpMessage::from_bytes(&msg.to_bytes()).unwrap();

        let close = decoded.as_close().unwrap();
        assert_eq!(close.cause(), CloseCause::Timeout);
        assert_eq!(close.cause_msg, "Handshake timeout");
        assert_eq!(decoded.kind(), Some(MessageKind::Close));
    }

    #[test]
    fn test_hello_fields() {
        let supported = vec!["Dummy".to_string(), "TPM2d".to_string()];
        let expected = vec!["Dummy".to_string()];
        let msg = IdscpMessage::hello(Bytes::from_static(b"dat"), &supported, &expected);

        let hello = msg.as_hello().unwrap();
        assert_eq!(hello.version, IDSCP_PROTOCOL_VERSION);
        assert_eq!(hello.dat_token(), Bytes::from_static(b"dat"));
        assert_eq!(hello.supported_rat_suite, supported);
        assert_eq!(hello.expected_rat_suite, expected);
    }

    #[test]
    fn test_empty_envelope_rejected() {
        let empty = IdscpMessage { message: None };
        let err = IdscpMessage::from_bytes(&empty.to_bytes()).unwrap_err();
        assert!(matches!(err, ProtoError::EmptyMessage));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(IdscpMessage::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_dat_expired_has_no_payload() {
        let msg = IdscpMessage::dat_expired();
        assert_eq!(msg.kind(), Some(MessageKind::DatExpired));
        assert!(msg.payload().is_none());
    }

    #[test]
    fn test_unknown_close_cause_is_error() {
        let close = IdscpClose {
            cause_code: 99,
            ..Default::default()
        };
        assert_eq!(close.cause(), CloseCause::Error);

        let known = IdscpClose {
            cause_code: CloseCause::RatProverFailed as i32,
            ..Default::default()
        };
        assert_eq!(known.cause(), CloseCause::RatProverFailed);
    }

    proptest! {
        #[test]
        fn prop_payload_survives_wire(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let data = Bytes::from(data);
            for msg in [
                IdscpMessage::rat_prover(data.clone()),
                IdscpMessage::rat_verifier(data.clone()),
                IdscpMessage::data(data.clone()),
            ] {
                let decoded = IdscpMessage::from_bytes(&msg.to_bytes()).unwrap();
                prop_assert_eq!(decoded.kind(), msg.kind());
                prop_assert_eq!(decoded.into_payload(), Some(data.clone()));
            }
        }
    }
}
