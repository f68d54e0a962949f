//! Simulated Santec power meter frame.

use crate::bench::Shared;
use crate::common::signal;
use async_trait::async_trait;
use std::sync::Arc;
use sts_core::config::SweepSettings;
use sts_core::selection::{available_ranges, ChannelMatrix};
use sts_core::{ChannelRef, DeviceKind, InstrumentStatus, ModuleType, StsError, StsResult};
use sts_hardware::{LoggingPowerMeter, LoggingStatus};

const DEVICE: DeviceKind = DeviceKind::Mpm;

/// Mock power meter.
pub struct MockMpm {
    shared: Arc<Shared>,
}

impl MockMpm {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl LoggingPowerMeter for MockMpm {
    async fn connect(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "mpm.connect")?;
        available_ranges(&self.shared.config.modules)
            .map_err(|e| StsError::connection(DEVICE, e.to_string()))?;
        tracing::info!(modules = self.shared.config.modules.len(), "Mock MPM connected");
        Ok(())
    }

    async fn disconnect(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "mpm.disconnect")
    }

    async fn modules(&self) -> StsResult<Vec<(u8, ModuleType)>> {
        self.shared.poll(DEVICE, "mpm.modules")?;
        Ok(self.shared.config.modules.clone())
    }

    async fn set_range(&self, range: u8) -> StsResult<()> {
        self.shared
            .call_with(DEVICE, "mpm.set_range", Some(range.to_string()))?;
        let allowed = available_ranges(&self.shared.config.modules)?;
        if !allowed.contains(&range) {
            return Err(StsError::parameter(
                DEVICE,
                format!("range {range} not supported (available: {allowed:?})"),
            ));
        }
        self.shared.state().range = range;
        Ok(())
    }

    async fn averaging_time_ms(&self) -> StsResult<f64> {
        self.shared.poll(DEVICE, "mpm.averaging_time_ms")?;
        self.shared
            .state()
            .logging_settings
            .map(|s| s.step_nm / s.speed_nm_per_s * 1000.0)
            .ok_or_else(|| StsError::parameter(DEVICE, "logging parameters not set"))
    }

    async fn set_logging_parameters(&self, sweep: &SweepSettings) -> StsResult<()> {
        self.shared.call(DEVICE, "mpm.set_logging_parameters")?;
        sweep
            .validate()
            .map_err(|e| StsError::parameter(DEVICE, e.to_string()))?;
        self.shared.state().logging_settings = Some(*sweep);
        Ok(())
    }

    async fn start_logging(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "mpm.start_logging")?;
        let mut state = self.shared.state();
        if state.logging_settings.is_none() {
            return Err(StsError::parameter(DEVICE, "logging parameters not set"));
        }
        state.logging = LoggingStatus::Logging { points: 0 };
        state.logged = None;
        Ok(())
    }

    async fn stop_logging(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "mpm.stop_logging")?;
        let mut state = self.shared.state();
        if matches!(state.logging, LoggingStatus::Logging { .. }) {
            state.logging = LoggingStatus::Stopped;
        }
        Ok(())
    }

    async fn logging_status(&self) -> StsResult<LoggingStatus> {
        self.shared.poll(DEVICE, "mpm.logging_status")?;
        Ok(self.shared.state().logging)
    }

    async fn channel_log_data(&self, slot: u8, channel: u8) -> StsResult<Vec<f64>> {
        self.shared.call_with(
            DEVICE,
            "mpm.channel_log_data",
            Some(format!("{slot},{channel}")),
        )?;
        let target = ChannelRef::new(slot, channel);
        if !ChannelMatrix::from_modules(&self.shared.config.modules).contains(target) {
            return Err(StsError::parameter(DEVICE, format!("no channel {target}")));
        }
        let logged = self.shared.state().logged.ok_or_else(|| {
            StsError::device(DEVICE, InstrumentStatus::Failure, "no logged data")
        })?;
        Ok(signal::logged_power(
            target,
            logged.points,
            logged.laser_dbm,
            logged.dut_loss_db,
            logged.range,
        ))
    }
}
