//! Simulated Santec tunable laser.
//!
//! Sweeps complete instantly on a software trigger: the laser goes from
//! WaitingForTrigger straight back to Standby, completing the meter's logging
//! and the sampler's run on the way.

use crate::bench::{LoggedSweep, SamplerState, Shared};
use crate::common::{signal, FaultScenario};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sts_core::config::{points_between, SweepSettings};
use sts_core::device::MAX_TSL_POWER_DBM;
use sts_core::{DeviceKind, InstrumentStatus, StsError, StsResult};
use sts_hardware::{LaserInfo, LoggingStatus, SweepLaser, SweepStatus};

const DEVICE: DeviceKind = DeviceKind::Tsl;

/// Mock tunable laser.
pub struct MockTsl {
    shared: Arc<Shared>,
}

impl MockTsl {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl SweepLaser for MockTsl {
    async fn connect(&self) -> StsResult<LaserInfo> {
        self.shared.call(DEVICE, "tsl.connect")?;
        let (min, max) = self.shared.config.wavelength_range_nm;
        tracing::info!(model = %self.shared.config.laser_model, "Mock TSL connected");
        Ok(LaserInfo {
            model: self.shared.config.laser_model.clone(),
            serial: "MOCK0001".into(),
            min_wavelength_nm: min,
            max_wavelength_nm: max,
        })
    }

    async fn disconnect(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "tsl.disconnect")
    }

    async fn set_power(&self, dbm: f64) -> StsResult<()> {
        self.shared.call_with(DEVICE, "tsl.set_power", Some(format!("{dbm}")))?;
        if dbm > MAX_TSL_POWER_DBM {
            return Err(StsError::parameter(
                DEVICE,
                format!("power {dbm} dBm exceeds {MAX_TSL_POWER_DBM} dBm"),
            ));
        }
        self.shared.state().power_dbm = dbm;
        Ok(())
    }

    async fn set_sweep_parameters(&self, sweep: &SweepSettings) -> StsResult<f64> {
        self.shared.call(DEVICE, "tsl.set_sweep_parameters")?;
        sweep
            .validate()
            .map_err(|e| StsError::parameter(DEVICE, e.to_string()))?;
        let (min, max) = self.shared.config.wavelength_range_nm;
        if sweep.start_nm < min || sweep.stop_nm > max {
            return Err(StsError::parameter(
                DEVICE,
                format!("sweep {}-{} nm outside {min}-{max} nm", sweep.start_nm, sweep.stop_nm),
            ));
        }
        let table = &self.shared.config.speed_table;
        if !table.is_empty() && !table.iter().any(|s| (s - sweep.speed_nm_per_s).abs() < 1e-9) {
            return Err(StsError::parameter(
                DEVICE,
                format!("speed {} nm/s not in the sweep speed table", sweep.speed_nm_per_s),
            ));
        }
        self.shared.state().sweep = Some(*sweep);
        Ok(sweep.step_nm)
    }

    async fn start_sweep(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "tsl.start_sweep")?;
        let mut state = self.shared.state();
        if state.sweep.is_none() {
            return Err(StsError::parameter(DEVICE, "sweep parameters not set"));
        }
        if !self.shared.has_fault(&FaultScenario::SweepNeverArms) {
            state.sweep_status = SweepStatus::WaitingForTrigger;
        }
        Ok(())
    }

    async fn stop_sweep(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "tsl.stop_sweep")?;
        self.shared.state().sweep_status = SweepStatus::Standby;
        Ok(())
    }

    async fn software_trigger(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "tsl.software_trigger")?;
        let mut state = self.shared.state();
        if state.sweep_status != SweepStatus::WaitingForTrigger {
            return Err(StsError::device(
                DEVICE,
                InstrumentStatus::DeviceError,
                format!("trigger while {}", state.sweep_status),
            ));
        }
        state.sweep_status = if self.shared.has_fault(&FaultScenario::SweepNeverReturns) {
            SweepStatus::Returning
        } else {
            SweepStatus::Standby
        };

        if state.logging == (LoggingStatus::Logging { points: 0 })
            && !self.shared.has_fault(&FaultScenario::NoTrigger)
        {
            if let Some(settings) = state.logging_settings {
                let points = points_between(settings.start_nm, settings.stop_nm, settings.step_nm);
                state.logging = LoggingStatus::Completed { points };
                state.logged = Some(LoggedSweep {
                    points,
                    range: state.range,
                    laser_dbm: state.power_dbm,
                    dut_loss_db: state.dut_loss_db,
                });
            }
        }

        if state.sampler == SamplerState::Sampling
            && !self.shared.has_fault(&FaultScenario::SamplingStalls)
        {
            if let Some(params) = state.sampling_params {
                let points = points_between(params.start_nm, params.stop_nm, params.actual_step_nm);
                let (trigger, monitor) = signal::sampled_monitor(points);
                state.samples.trigger = trigger;
                state.samples.monitor = monitor;
                state.sampler = SamplerState::Complete;
            }
        }
        tracing::debug!(status = %state.sweep_status, "Mock sweep triggered");
        Ok(())
    }

    async fn sweep_status(&self) -> StsResult<SweepStatus> {
        self.shared.poll(DEVICE, "tsl.sweep_status")?;
        Ok(self.shared.state().sweep_status)
    }

    async fn is_busy(&self) -> StsResult<bool> {
        self.shared.poll(DEVICE, "tsl.is_busy")?;
        Ok(false)
    }

    fn supports_sweep_speed_table(&self) -> bool {
        !self.shared.config.speed_table.is_empty()
    }

    async fn sweep_speed_table(&self) -> StsResult<Vec<f64>> {
        self.shared.call(DEVICE, "tsl.sweep_speed_table")?;
        Ok(self.shared.config.speed_table.clone())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}
