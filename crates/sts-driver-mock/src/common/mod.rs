//! Shared pieces of the simulated devices.

pub mod faults;
pub mod signal;

pub use faults::{FaultConfig, FaultKind, FaultScenario};
