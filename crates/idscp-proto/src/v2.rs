//! IDSCP2 message definitions (protobuf, proto3 semantics).

/// Envelope carrying exactly one IDSCP2 message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpMessage {
    #[prost(oneof = "idscp_message::Message", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub message: ::core::option::Option<idscp_message::Message>,
}

/// Nested types of [`IdscpMessage`].
pub mod idscp_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        IdscpHello(super::IdscpHello),
        #[prost(message, tag = "2")]
        IdscpClose(super::IdscpClose),
        #[prost(message, tag = "3")]
        IdscpDatExpired(super::IdscpDatExpired),
        #[prost(message, tag = "4")]
        IdscpDat(super::IdscpDat),
        #[prost(message, tag = "5")]
        IdscpReRat(super::IdscpReRat),
        #[prost(message, tag = "6")]
        IdscpRatProver(super::IdscpRatProver),
        #[prost(message, tag = "7")]
        IdscpRatVerifier(super::IdscpRatVerifier),
        #[prost(message, tag = "8")]
        IdscpData(super::IdscpData),
    }
}

/// First message of the handshake: our DAT plus the RAT suites we offer and expect.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpHello {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "2")]
    pub dynamic_attribute_token: ::core::option::Option<IdscpDat>,
    /// Mechanisms this peer can run as prover.
    #[prost(string, repeated, tag = "3")]
    pub supported_rat_suite: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Mechanisms this peer wants to verify the remote with.
    #[prost(string, repeated, tag = "4")]
    pub expected_rat_suite: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpClose {
    #[prost(enumeration = "idscp_close::CloseCause", tag = "1")]
    pub cause_code: i32,
    #[prost(string, tag = "2")]
    pub cause_msg: ::prost::alloc::string::String,
}

/// Nested types of [`IdscpClose`].
pub mod idscp_close {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum CloseCause {
        UserShutdown = 0,
        Timeout = 1,
        Error = 2,
        NoValidDat = 3,
        NoRatMechanismMatchProver = 4,
        NoRatMechanismMatchVerifier = 5,
        RatProverFailed = 6,
        RatVerifierFailed = 7,
    }

    impl CloseCause {
        /// Protobuf name of the value.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::UserShutdown => "USER_SHUTDOWN",
                Self::Timeout => "TIMEOUT",
                Self::Error => "ERROR",
                Self::NoValidDat => "NO_VALID_DAT",
                Self::NoRatMechanismMatchProver => "NO_RAT_MECHANISM_MATCH_PROVER",
                Self::NoRatMechanismMatchVerifier => "NO_RAT_MECHANISM_MATCH_VERIFIER",
                Self::RatProverFailed => "RAT_PROVER_FAILED",
                Self::RatVerifierFailed => "RAT_VERIFIER_FAILED",
            }
        }
    }
}

/// Sent when the sender's view of the peer DAT has expired.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct IdscpDatExpired {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpDat {
    #[prost(bytes = "bytes", tag = "1")]
    pub token: ::prost::bytes::Bytes,
}

/// Asks the peer to run its prover again.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpReRat {
    #[prost(string, tag = "1")]
    pub cause: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpRatProver {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: ::prost::bytes::Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpRatVerifier {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: ::prost::bytes::Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdscpData {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: ::prost::bytes::Bytes,
}
