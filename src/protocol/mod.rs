//! Wire and record types for panel telemetry
//!
//! This module holds the message structures exchanged with field devices and
//! the records produced by the inference pipeline, plus the topic conventions
//! that tie them to the broker.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
