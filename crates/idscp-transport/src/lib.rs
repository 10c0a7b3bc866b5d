//! Secure channel abstraction for IDSCP2.
//!
//! IDSCP2 runs on top of an already mutually authenticated channel (usually
//! TLS). This crate only describes what the connection layer needs from such a
//! channel, provides length-prefixed framing for stream transports, and ships
//! in-memory channels for tests.

pub mod framing;
pub mod stream;
pub mod testing;
pub mod traits;

pub use framing::*;
pub use stream::*;
pub use testing::*;
pub use traits::*;
