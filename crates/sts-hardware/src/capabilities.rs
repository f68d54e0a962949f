//! Instrument contracts used by the sweep orchestrator.
//!
//! One trait per physical device. Each trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync) and takes `&self`
//! - Returns [`StsResult`] and raises on any non-zero device status
//! - Never retries; retry and abort policy belongs to the caller
//!
//! `stop_*` operations are idempotent: stopping a device that is not running
//! succeeds. Every wait takes an explicit bound and fails with
//! [`StsError::SynchronizationTimeout`] when it expires.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn arm<L: SweepLaser, M: LoggingPowerMeter>(tsl: &L, mpm: &M) -> StsResult<()> {
//!     tsl.start_sweep().await?;
//!     mpm.start_logging().await?;
//!     tsl.wait_for_sweep_status(SweepStatus::WaitingForTrigger, Duration::from_secs(3))
//!         .await
//! }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use sts_core::config::SweepSettings;
use sts_core::device::ModuleType;
use sts_core::selection::{available_ranges, ChannelMatrix};
use sts_core::{DeviceKind, StsError, StsResult};
use tokio::time::Instant;

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Tunable laser
// =============================================================================

/// Sweep state reported by the laser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepStatus {
    /// Idle, ready for a new sweep.
    Standby,
    /// Sweeping.
    Running,
    /// Sweep paused.
    Pausing,
    /// Armed, waiting for a trigger to start sweeping.
    WaitingForTrigger,
    /// Returning to the start wavelength.
    Returning,
}

impl SweepStatus {
    /// Vendor status number (1 = Standby ... 5 = Returning).
    pub fn code(&self) -> u8 {
        match self {
            SweepStatus::Standby => 1,
            SweepStatus::Running => 2,
            SweepStatus::Pausing => 3,
            SweepStatus::WaitingForTrigger => 4,
            SweepStatus::Returning => 5,
        }
    }

    /// Parse a vendor status number.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SweepStatus::Standby),
            2 => Some(SweepStatus::Running),
            3 => Some(SweepStatus::Pausing),
            4 => Some(SweepStatus::WaitingForTrigger),
            5 => Some(SweepStatus::Returning),
            _ => None,
        }
    }
}

impl fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepStatus::Standby => write!(f, "Standby"),
            SweepStatus::Running => write!(f, "Running"),
            SweepStatus::Pausing => write!(f, "Pausing"),
            SweepStatus::WaitingForTrigger => write!(f, "WaitingForTrigger"),
            SweepStatus::Returning => write!(f, "Returning"),
        }
    }
}

/// What the laser reported when it was connected.
#[derive(Debug, Clone, PartialEq)]
pub struct LaserInfo {
    /// Product name, e.g. `TSL-570`.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Lowest wavelength the laser can emit, nm.
    pub min_wavelength_nm: f64,
    /// Highest wavelength the laser can emit, nm.
    pub max_wavelength_nm: f64,
}

/// Capability: swept tunable laser source.
#[async_trait]
pub trait SweepLaser: Send + Sync {
    /// Open the link, check identity and switch the laser diode on.
    ///
    /// Fails with `Connection` when the device does not answer or its model
    /// cannot be used over the configured interface.
    async fn connect(&self) -> StsResult<LaserInfo>;

    /// Release the device.
    async fn disconnect(&self) -> StsResult<()>;

    /// Set the output power in dBm.
    async fn set_power(&self, dbm: f64) -> StsResult<()>;

    /// Configure the sweep and return the actual trigger step in nm.
    async fn set_sweep_parameters(&self, sweep: &SweepSettings) -> StsResult<f64>;

    /// Start a sweep cycle. The laser arms and waits for a trigger.
    async fn start_sweep(&self) -> StsResult<()>;

    /// Stop the sweep. Succeeds when no sweep is running.
    async fn stop_sweep(&self) -> StsResult<()>;

    /// Issue a software trigger.
    async fn software_trigger(&self) -> StsResult<()>;

    /// Current sweep state.
    async fn sweep_status(&self) -> StsResult<SweepStatus>;

    /// True while the laser is processing a command.
    async fn is_busy(&self) -> StsResult<bool>;

    /// True if the model provides a discrete sweep speed table.
    fn supports_sweep_speed_table(&self) -> bool;

    /// Allowed sweep speeds in nm/s. Empty when the model has no table.
    async fn sweep_speed_table(&self) -> StsResult<Vec<f64>>;

    /// Interval between status polls.
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Poll the sweep state until it equals `target`.
    async fn wait_for_sweep_status(&self, target: SweepStatus, timeout: Duration) -> StsResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.sweep_status().await?;
            if status == target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::debug!(%status, %target, "TSL sweep status wait expired");
                return Err(StsError::timeout(DeviceKind::Tsl, target.to_string(), timeout));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Poll until the laser stops reporting busy.
    async fn wait_until_idle(&self, timeout: Duration) -> StsResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_busy().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StsError::timeout(DeviceKind::Tsl, "idle", timeout));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}

// =============================================================================
// Power meter
// =============================================================================

/// Power meter logging state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingStatus {
    /// Logging, `points` samples taken so far.
    Logging {
        /// Samples logged so far
        points: usize,
    },
    /// Logging finished with `points` samples.
    Completed {
        /// Samples logged
        points: usize,
    },
    /// Logging was stopped before completion.
    Stopped,
}

/// Capability: multi-channel power meter with hardware logging.
#[async_trait]
pub trait LoggingPowerMeter: Send + Sync {
    /// Open the link and read the installed modules.
    async fn connect(&self) -> StsResult<()>;

    /// Release the device.
    async fn disconnect(&self) -> StsResult<()>;

    /// Installed modules by slot. Empty slots are omitted.
    async fn modules(&self) -> StsResult<Vec<(u8, ModuleType)>>;

    /// Set the dynamic range on all modules.
    ///
    /// Fails with `Parameter` when the range is not supported by every
    /// installed module.
    async fn set_range(&self, range: u8) -> StsResult<()>;

    /// Averaging time in ms derived from the logging parameters.
    async fn averaging_time_ms(&self) -> StsResult<f64>;

    /// Configure logging for a sweep.
    async fn set_logging_parameters(&self, sweep: &SweepSettings) -> StsResult<()>;

    /// Start logging; the meter waits for laser triggers.
    async fn start_logging(&self) -> StsResult<()>;

    /// Stop logging. Succeeds when logging is not running.
    async fn stop_logging(&self) -> StsResult<()>;

    /// Current logging state.
    async fn logging_status(&self) -> StsResult<LoggingStatus>;

    /// Logged power for one channel.
    async fn channel_log_data(&self, slot: u8, channel: u8) -> StsResult<Vec<f64>>;

    /// Check logging has completed, with a single status poll.
    ///
    /// A meter still waiting with zero logged points after the sweep has
    /// received no triggers and fails with `TriggerCable`.
    async fn wait_for_log_completion(&self) -> StsResult<usize> {
        match self.logging_status().await? {
            LoggingStatus::Completed { points } => Ok(points),
            LoggingStatus::Logging { points: 0 } => Err(StsError::TriggerCable),
            LoggingStatus::Logging { points } => Ok(points),
            // Stopped counts as success for the completion check.
            LoggingStatus::Stopped => Ok(0),
        }
    }

    /// Enabled channels per slot.
    async fn channel_matrix(&self) -> StsResult<ChannelMatrix> {
        Ok(ChannelMatrix::from_modules(&self.modules().await?))
    }

    /// Dynamic ranges usable with the installed modules.
    async fn available_ranges(&self) -> StsResult<Vec<u8>> {
        available_ranges(&self.modules().await?)
    }
}

// =============================================================================
// Monitor sampler
// =============================================================================

/// Sampling configuration for one sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParameters {
    /// Sweep start, nm.
    pub start_nm: f64,
    /// Sweep stop, nm.
    pub stop_nm: f64,
    /// Sweep speed, nm/s.
    pub speed_nm_per_s: f64,
    /// Actual laser trigger step, nm.
    pub actual_step_nm: f64,
    /// Power meter averaging time, ms.
    pub averaging_time_ms: f64,
}

/// Raw samples captured during one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingData {
    /// Trigger channel samples.
    pub trigger: Vec<f64>,
    /// Wavelength monitor samples.
    pub monitor: Vec<f64>,
}

/// Capability: DAQ sampler for the laser trigger and wavelength monitor.
#[async_trait]
pub trait MonitorSampler: Send + Sync {
    /// Open the device.
    async fn connect(&self) -> StsResult<()>;

    /// Release the device.
    async fn disconnect(&self) -> StsResult<()>;

    /// Configure sampling for a sweep.
    async fn set_sampling_parameters(&self, params: &SamplingParameters) -> StsResult<()>;

    /// Start sampling.
    async fn start_sampling(&self) -> StsResult<()>;

    /// Stop sampling. Succeeds when sampling is not running.
    async fn stop_sampling(&self) -> StsResult<()>;

    /// Block until the sweep has been sampled completely.
    async fn wait_for_sampling(&self, timeout: Duration) -> StsResult<()>;

    /// Samples from the last completed sampling run.
    async fn sampling_data(&self) -> StsResult<SamplingData>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedMeter {
        status: Mutex<LoggingStatus>,
    }

    #[async_trait]
    impl LoggingPowerMeter for ScriptedMeter {
        async fn connect(&self) -> StsResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> StsResult<()> {
            Ok(())
        }
        async fn modules(&self) -> StsResult<Vec<(u8, ModuleType)>> {
            Ok(vec![(0, ModuleType::Mpm211), (1, ModuleType::Mpm212)])
        }
        async fn set_range(&self, _range: u8) -> StsResult<()> {
            Ok(())
        }
        async fn averaging_time_ms(&self) -> StsResult<f64> {
            Ok(0.2)
        }
        async fn set_logging_parameters(&self, _sweep: &SweepSettings) -> StsResult<()> {
            Ok(())
        }
        async fn start_logging(&self) -> StsResult<()> {
            Ok(())
        }
        async fn stop_logging(&self) -> StsResult<()> {
            Ok(())
        }
        async fn logging_status(&self) -> StsResult<LoggingStatus> {
            Ok(*self.status.lock().unwrap())
        }
        async fn channel_log_data(&self, _slot: u8, _channel: u8) -> StsResult<Vec<f64>> {
            Ok(Vec::new())
        }
    }

    fn meter(status: LoggingStatus) -> ScriptedMeter {
        ScriptedMeter {
            status: Mutex::new(status),
        }
    }

    #[tokio::test]
    async fn completion_check_maps_statuses() {
        assert_eq!(
            meter(LoggingStatus::Completed { points: 10 })
                .wait_for_log_completion()
                .await
                .unwrap(),
            10
        );
        assert!(matches!(
            meter(LoggingStatus::Logging { points: 0 })
                .wait_for_log_completion()
                .await,
            Err(StsError::TriggerCable)
        ));
        assert_eq!(
            meter(LoggingStatus::Stopped)
                .wait_for_log_completion()
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn matrix_and_ranges_come_from_modules() {
        let m = meter(LoggingStatus::Stopped);
        assert_eq!(m.channel_matrix().await.unwrap().channels().count(), 6);
        assert_eq!(m.available_ranges().await.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sweep_status_codes() {
        for code in 1..=5 {
            assert_eq!(SweepStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(SweepStatus::from_code(0), None);
    }
}
