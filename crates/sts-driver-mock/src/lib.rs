//! Simulated instruments for the insertion-loss swept test.
//!
//! Provides a laser, power meter and monitor sampler that behave like the
//! real bench without hardware:
//! - [`MockTsl`] - laser whose software trigger runs a complete sweep
//! - [`MockMpm`] - power meter frame with configurable modules
//! - [`MockSpu`] - DAQ sampler producing one trigger edge per step
//!
//! The devices share state through a [`MockBench`], which also records every
//! call and injects faults configured with [`FaultConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sts_driver_mock::{FaultConfig, FaultScenario, MockBench};
//!
//! let mock = MockBench::with_faults(FaultConfig::scenario(FaultScenario::NoTrigger));
//! let bench = mock.bench();
//! bench.connect_all().await?;
//! assert_eq!(mock.call_count("tsl.connect"), 1);
//! ```

pub mod bench;
pub mod common;
pub mod mock_laser;
pub mod mock_power_meter;
pub mod mock_sampler;

pub use bench::{MockBench, MockBenchConfig};
pub use common::{FaultConfig, FaultKind, FaultScenario};
pub use mock_laser::MockTsl;
pub use mock_power_meter::MockMpm;
pub use mock_sampler::MockSpu;
