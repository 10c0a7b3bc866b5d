//! IDSCP2 protocol messages.
//!
//! The wire types live in [`v2`] and are plain `prost` messages, so any
//! protobuf implementation on the other side of the channel can talk to us.
//! [`conversions`] adds constructors, message classification and the
//! byte-level encode/decode entry points used by the connection layer.

#![forbid(unsafe_code)]

pub mod conversions;
pub mod v2;

pub use conversions::{MessageKind, ProtoError};
pub use v2::idscp_close::CloseCause;
pub use v2::IdscpMessage;

/// Protocol version announced in `IdscpHello`.
pub const IDSCP_PROTOCOL_VERSION: i32 = 2;
