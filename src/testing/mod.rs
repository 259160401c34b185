//! Testing utilities and mock implementations
//!
//! Mocks for the transport, predictors and stores so the telemetry components
//! can be tested without a broker, a model server or a filesystem.

pub mod mocks;

pub use mocks::*;
