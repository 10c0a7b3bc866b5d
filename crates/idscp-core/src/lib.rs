//! IDSCP2 Core - connection state machine for the IDS communication protocol.
//!
//! This crate implements:
//! - The connection FSM: handshake, DAT renewal and periodic re-attestation
//! - Per-state transition tables and the serialized event dispatcher
//! - Timers that feed the dispatcher
//! - DAT and RAT driver contracts, a driver registry and dummy drivers
//! - The `Idscp2Connection` façade over a secure channel
//! - Configuration loading

#![forbid(unsafe_code)]

// State machine
pub mod fsm;

// Collaborators
pub mod drivers;

// Application surface
pub mod connection;
pub mod config;

// Supporting modules
pub mod errors;
pub mod harness;

pub use config::{AttestationConfig, ConfigError, Idscp2Configuration};
pub use connection::{Idscp2Connection, Idscp2ConnectionListener, Idscp2MessageListener};
pub use drivers::{DapsDriver, RatDriver, RatDriverFactory, RatDriverHandle, RatRegistry};
pub use errors::{CloseInitiator, CloseReason, DapsError, FsmError, Idscp2Error, RatDriverError};
pub use fsm::FsmState;
