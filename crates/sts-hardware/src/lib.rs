//! `sts-hardware`
//!
//! Instrument side of the insertion-loss swept test.
//!
//! - [`capabilities`]: async contracts for the laser ([`SweepLaser`]), the
//!   power meter ([`LoggingPowerMeter`]) and the monitor sampler
//!   ([`MonitorSampler`])
//! - [`transport`]: the session-owned [`TransportContext`] opening LAN, USB
//!   and GPIB-bridge links
//! - [`scpi`]: the line-based command link shared by all drivers
//! - [`drivers`]: Santec TSL / MPM and the SCPI sampling bridge
//! - [`bench`]: the three devices bundled as trait objects

pub mod bench;
pub mod capabilities;
pub mod drivers;
pub mod scpi;
pub mod transport;

pub use bench::Bench;
pub use capabilities::{
    LaserInfo, LoggingPowerMeter, LoggingStatus, MonitorSampler, SamplingData,
    SamplingParameters, SweepLaser, SweepStatus,
};
pub use scpi::ScpiLink;
pub use transport::TransportContext;
