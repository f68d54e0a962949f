//! Sweep orchestration for the insertion-loss swept test.
//!
//! The orchestrator sequences the laser, the power meter and the monitor
//! sampler through one physical sweep at a time and feeds what they captured
//! to the rescaling service.
//!
//! # Cycle state machine
//!
//! ```text
//! ┌──────┐ start sweep, start logging ┌──────────────┐  laser armed  ┌─────────┐
//! │ Idle │───────────────────────────▶│ TriggerArmed │──────────────▶│ Logging │
//! └──────┘                            └──────────────┘               └────┬────┘
//!                                                                         │ start sampling,
//!                                                                         │ software trigger
//! ┌─────────┐  laser in standby ┌────────────┐ sampled, logged, stopped ┌──▼───────┐
//! │ Standby │◀──────────────────│ Completing │◀─────────────────────────│ Sampling │
//! └─────────┘                   └────────────┘                          └──────────┘
//!
//!  any failure ──▶ Aborting
//! ```
//!
//! Cleanup on failure:
//! - sweep or logging start fails: nothing is stopped
//! - waiting for the armed laser, starting the sampler or triggering fails:
//!   one best-effort logging stop
//! - sampling or log completion fails: logging is stopped as on success
//! - the standby wait fails: logging was already stopped; the error is fatal
//!
//! Secondary cleanup failures are logged and never replace the original error.
//! The laser is never stopped inside a cycle.

use crate::operator::Operator;
use crate::rescaling::{RescalingMode, RescalingService};
use std::collections::HashSet;
use std::fmt;
use sts_core::config::SweepSettings;
use sts_core::{
    AcquisitionPlan, InsertionLossTrace, MeasurementRecord, MonitorUnit, RecordKey,
    ReferenceRecord, StsError, StsResult, SweepUnit, TimeoutConfig,
};
use sts_hardware::{Bench, SamplingParameters, SweepStatus};
use tracing::{debug, info, instrument, warn};

/// Where the current sweep cycle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle started.
    Idle,
    /// Sweep and logging started, waiting for the laser to arm.
    TriggerArmed,
    /// Laser armed, meter logging.
    Logging,
    /// Sampler running, laser triggered.
    Sampling,
    /// Sweep sampled and logged, logging stopped.
    Completing,
    /// Laser back in standby; the cycle succeeded.
    Standby,
    /// The cycle failed.
    Aborting,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => write!(f, "idle"),
            CycleState::TriggerArmed => write!(f, "trigger-armed"),
            CycleState::Logging => write!(f, "logging"),
            CycleState::Sampling => write!(f, "sampling"),
            CycleState::Completing => write!(f, "completing"),
            CycleState::Standby => write!(f, "standby"),
            CycleState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Sweep settings accepted by the laser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfiguredSweep {
    /// Requested settings.
    pub settings: SweepSettings,
    /// Trigger step the laser actually uses, nm.
    pub actual_step_nm: f64,
}

/// Drives reference and measurement phases on one bench.
pub struct SweepOrchestrator {
    bench: Bench,
    rescaler: Box<dyn RescalingService>,
    timeouts: TimeoutConfig,
    sweep: Option<ConfiguredSweep>,
    plan: Option<AcquisitionPlan>,
    state: CycleState,
    references: Vec<ReferenceRecord>,
    measurements: Vec<MeasurementRecord>,
    insertion_loss: Vec<InsertionLossTrace>,
    wavelength_table: Vec<f64>,
}

fn check_lengths(what: RecordKey, wavelength: &[f64], power: &[f64], monitor: &[f64]) -> StsResult<()> {
    if wavelength.is_empty() || wavelength.len() != power.len() || wavelength.len() != monitor.len() {
        return Err(StsError::DataIntegrity(format!(
            "{what}: wavelength table has {} points, power {}, monitor {}",
            wavelength.len(),
            power.len(),
            monitor.len()
        )));
    }
    Ok(())
}

impl SweepOrchestrator {
    /// Create an orchestrator for connected devices.
    pub fn new(bench: Bench, rescaler: Box<dyn RescalingService>, timeouts: TimeoutConfig) -> Self {
        Self {
            bench,
            rescaler,
            timeouts,
            sweep: None,
            plan: None,
            state: CycleState::Idle,
            references: Vec::new(),
            measurements: Vec::new(),
            insertion_loss: Vec::new(),
            wavelength_table: Vec::new(),
        }
    }

    /// The devices.
    pub fn bench(&self) -> &Bench {
        &self.bench
    }

    /// State of the last (or running) cycle.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Active acquisition plan.
    pub fn plan(&self) -> Option<&AcquisitionPlan> {
        self.plan.as_ref()
    }

    /// Sweep settings accepted by the laser.
    pub fn configured_sweep(&self) -> Option<ConfiguredSweep> {
        self.sweep
    }

    /// Reference records of the last successful reference phase.
    pub fn references(&self) -> &[ReferenceRecord] {
        &self.references
    }

    /// Measurement records accumulated since the last clear.
    pub fn measurements(&self) -> &[MeasurementRecord] {
        &self.measurements
    }

    /// Insertion loss of the last measurement phase, one trace per channel.
    pub fn insertion_loss(&self) -> &[InsertionLossTrace] {
        &self.insertion_loss
    }

    /// Target wavelength table of the last measurement phase.
    pub fn wavelength_table(&self) -> &[f64] {
        &self.wavelength_table
    }

    fn enter(&mut self, next: CycleState) {
        debug!(from = %self.state, to = %next, "Cycle state");
        self.state = next;
    }

    fn require_plan(&self) -> StsResult<AcquisitionPlan> {
        self.plan
            .clone()
            .ok_or_else(|| StsError::Configuration("no channels and ranges selected".into()))
    }

    fn require_sweep(&self) -> StsResult<ConfiguredSweep> {
        self.sweep
            .ok_or_else(|| StsError::Configuration("sweep parameters not configured".into()))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set laser power and sweep, returning the actual trigger step.
    #[instrument(skip(self), err)]
    pub async fn configure_laser(&mut self, settings: SweepSettings) -> StsResult<f64> {
        settings.validate()?;
        let tsl = self.bench.tsl.clone();
        tsl.wait_until_idle(self.timeouts.busy()).await?;
        tsl.set_power(settings.power_dbm).await?;
        let actual_step_nm = tsl.set_sweep_parameters(&settings).await?;
        info!(actual_step_nm, "Laser sweep configured");
        self.sweep = Some(ConfiguredSweep {
            settings,
            actual_step_nm,
        });
        Ok(actual_step_nm)
    }

    /// Configure meter logging, sampler and rescaling tables for the
    /// configured sweep.
    ///
    /// Existing reference data no longer fits the new tables and is dropped.
    #[instrument(skip(self), err)]
    pub async fn configure_acquisition(&mut self) -> StsResult<()> {
        let sweep = self.require_sweep()?;
        let settings = sweep.settings;
        // The meter logs one point per laser trigger.
        let logging = SweepSettings {
            step_nm: sweep.actual_step_nm,
            ..settings
        };
        self.bench.mpm.set_logging_parameters(&logging).await?;
        let averaging_time_ms = self.bench.mpm.averaging_time_ms().await?;
        self.bench
            .spu
            .set_sampling_parameters(&SamplingParameters {
                start_nm: settings.start_nm,
                stop_nm: settings.stop_nm,
                speed_nm_per_s: settings.speed_nm_per_s,
                actual_step_nm: sweep.actual_step_nm,
                averaging_time_ms,
            })
            .await?;

        self.rescaler.clear_measurement()?;
        self.rescaler.clear_reference()?;
        self.rescaler
            .make_sweep_wavelength_table(settings.start_nm, settings.stop_nm, sweep.actual_step_nm)?;
        self.rescaler
            .make_target_wavelength_table(settings.start_nm, settings.stop_nm, settings.step_nm)?;
        self.rescaler
            .set_rescaling_mode(RescalingMode::FreerunSpu, averaging_time_ms, true)?;
        self.references.clear();
        info!(averaging_time_ms, "Acquisition configured");
        Ok(())
    }

    /// Install the acquisition plan for the selected channels and ranges.
    ///
    /// Reference data and the rescaler's measurement captures belong to a
    /// plan and are dropped. Measurement records are kept until
    /// [`SweepOrchestrator::clear_measurements`].
    pub fn set_plan(&mut self, plan: AcquisitionPlan) -> StsResult<()> {
        self.rescaler.clear_measurement()?;
        info!(
            channels = plan.channels().len(),
            ranges = ?plan.ranges_in_use(),
            "Acquisition plan set"
        );
        self.plan = Some(plan);
        self.references.clear();
        self.insertion_loss.clear();
        Ok(())
    }

    /// Drop accumulated measurement records.
    pub fn clear_measurements(&mut self) -> StsResult<()> {
        self.rescaler.clear_measurement()?;
        self.measurements.clear();
        self.insertion_loss.clear();
        Ok(())
    }

    // =========================================================================
    // Sweep cycle
    // =========================================================================

    /// Run one physical sweep: arm, log, sample, trigger, complete, return to
    /// standby.
    #[instrument(skip(self), err)]
    pub async fn run_cycle(&mut self) -> StsResult<()> {
        let sweep = self.require_sweep()?;
        let sampling_timeout = self.timeouts.sampling(sweep.settings.sweep_duration()?);
        let bench = self.bench.clone();
        self.enter(CycleState::Idle);

        if let Err(e) = bench.tsl.start_sweep().await {
            self.enter(CycleState::Aborting);
            return Err(e);
        }
        if let Err(e) = bench.mpm.start_logging().await {
            // The laser keeps its sweep; stopping it is up to the caller.
            self.enter(CycleState::Aborting);
            return Err(e);
        }
        self.enter(CycleState::TriggerArmed);

        if let Err(e) = bench
            .tsl
            .wait_for_sweep_status(SweepStatus::WaitingForTrigger, self.timeouts.trigger_armed())
            .await
        {
            return Err(self.abort_logging(e).await);
        }
        self.enter(CycleState::Logging);

        let triggered = async {
            bench.spu.start_sampling().await?;
            bench.tsl.software_trigger().await
        }
        .await;
        if let Err(e) = triggered {
            return Err(self.abort_logging(e).await);
        }
        self.enter(CycleState::Sampling);

        let completed = async {
            bench.spu.wait_for_sampling(sampling_timeout).await?;
            bench.mpm.wait_for_log_completion().await
        }
        .await;
        let stopped = bench.mpm.stop_logging().await;
        match (completed, stopped) {
            (Err(e), stopped) => {
                if let Err(stop_error) = stopped {
                    warn!(error = %stop_error, "Best-effort MPM logging stop failed");
                }
                self.enter(CycleState::Aborting);
                return Err(e);
            }
            (Ok(_), Err(e)) => {
                self.enter(CycleState::Aborting);
                return Err(e);
            }
            (Ok(points), Ok(())) => debug!(points, "Logging complete"),
        }
        self.enter(CycleState::Completing);

        if let Err(e) = bench
            .tsl
            .wait_for_sweep_status(SweepStatus::Standby, self.timeouts.standby())
            .await
        {
            self.enter(CycleState::Aborting);
            return Err(e);
        }
        self.enter(CycleState::Standby);
        Ok(())
    }

    async fn abort_logging(&mut self, error: StsError) -> StsError {
        if let Err(stop_error) = self.bench.mpm.stop_logging().await {
            warn!(error = %stop_error, "Best-effort MPM logging stop failed");
        }
        self.enter(CycleState::Aborting);
        error
    }

    // =========================================================================
    // Reference
    // =========================================================================

    /// Capture the reference of every selected channel, one sweep each.
    ///
    /// Either every channel gets a rescaled reference or the phase fails and
    /// no reference is kept.
    #[instrument(skip_all, err)]
    pub async fn run_reference(&mut self, operator: &dyn Operator) -> StsResult<()> {
        let plan = self.require_plan()?;
        self.require_sweep()?;
        self.references.clear();
        self.rescaler.clear_reference()?;

        let mut captured = Vec::with_capacity(plan.reference_shells().len());
        for shell in plan.reference_shells() {
            let channel = shell.channel_ref();
            let unit = *plan.reference_monitor_for(channel).ok_or_else(|| {
                StsError::Configuration(format!("no reference unit for {channel}"))
            })?;
            operator.confirm_reference_connection(channel).await?;
            captured.push(self.capture_reference(shell, &unit).await?);
        }
        info!(channels = captured.len(), "Reference captured");
        self.references = captured;
        Ok(())
    }

    #[instrument(skip_all, fields(slot = unit.slot, channel = unit.channel, range = unit.range), err)]
    async fn capture_reference(
        &mut self,
        shell: &ReferenceRecord,
        unit: &MonitorUnit,
    ) -> StsResult<ReferenceRecord> {
        let bench = self.bench.clone();
        bench.mpm.set_range(unit.range).await?;
        self.run_cycle().await?;

        let mut record = shell.clone();
        record.log_data = bench.mpm.channel_log_data(unit.slot, unit.channel).await?;
        let samples = bench.spu.sampling_data().await?;
        record.trigger = samples.trigger;
        record.monitor = samples.monitor;
        self.rescale_reference_record(&mut record, unit)?;

        bench.tsl.stop_sweep().await?;
        Ok(record)
    }

    /// Feed a record's raw arrays to the rescaler and fill its rescaled ones.
    fn rescale_reference_record(&mut self, record: &mut ReferenceRecord, unit: &SweepUnit) -> StsResult<()> {
        self.rescaler.add_reference_channel_data(&record.log_data, unit)?;
        self.rescaler
            .add_reference_monitor_data(&record.trigger, &record.monitor, unit)?;
        self.rescaler.rescale_reference()?;
        let (power, monitor) = self.rescaler.reference_data(unit)?;
        let wavelength = self.rescaler.target_wavelength_table()?;
        check_lengths(record.key(), &wavelength, &power, &monitor)?;
        record.rescaled_reference_power = power;
        record.rescaled_monitor = monitor;
        record.rescaled_wavelength = wavelength;
        Ok(())
    }

    /// Use cached reference records instead of measuring.
    ///
    /// The cache must hold exactly the selected channels. Any mismatch fails
    /// with `MismatchedCache` before the rescaler is touched.
    #[instrument(skip_all, fields(cached = cached.len()), err)]
    pub fn run_reference_from_cache(&mut self, cached: &[ReferenceRecord]) -> StsResult<()> {
        let plan = self.require_plan()?;
        self.require_sweep()?;
        let units = plan.reference_monitors();
        if cached.len() != units.len() {
            return Err(StsError::MismatchedCache(format!(
                "cache holds {} channels, selection has {}",
                cached.len(),
                units.len()
            )));
        }
        let mut seen = HashSet::new();
        for record in cached {
            let key = record.key();
            if !units.iter().any(|u| u.key() == key) {
                return Err(StsError::MismatchedCache(format!(
                    "cached {key} is not in the selection"
                )));
            }
            if !seen.insert(key) {
                return Err(StsError::MismatchedCache(format!("cached {key} appears twice")));
            }
            if !record.has_raw_data() {
                return Err(StsError::MismatchedCache(format!("cached {key} has no raw data")));
            }
        }

        self.references.clear();
        self.rescaler.clear_reference()?;
        let mut loaded = Vec::with_capacity(units.len());
        for unit in units {
            let mut record = cached
                .iter()
                .find(|r| r.key() == unit.key())
                .cloned()
                .ok_or_else(|| StsError::MismatchedCache(format!("no cached {}", unit.key())))?;
            debug!(channel = %record.channel_ref(), "Loading cached reference");
            self.rescale_reference_record(&mut record, unit)?;
            loaded.push(record);
        }
        info!(channels = loaded.len(), "Reference loaded from cache");
        self.references = loaded;
        Ok(())
    }

    // =========================================================================
    // Measurement
    // =========================================================================

    /// Sweep every range once with the DUT connected, rescale, merge, and
    /// append one record per channel and range.
    ///
    /// Returns the number of records added. Records of earlier runs are kept.
    #[instrument(skip(self), err)]
    pub async fn run_measurement(&mut self) -> StsResult<usize> {
        let plan = self.require_plan()?;
        if self.references.len() != plan.reference_shells().len() {
            return Err(StsError::Configuration(
                "reference data must be captured or loaded before measuring".into(),
            ));
        }

        for range in plan.ranges_in_use() {
            self.measure_range(&plan, *range).await?;
        }

        self.rescaler.rescale_measurement()?;
        let mut traces = Vec::with_capacity(plan.merge_units().len());
        for merge in plan.merge_units() {
            let loss = self.rescaler.merge_ranges(merge)?;
            traces.push(InsertionLossTrace {
                module: merge.module,
                channel: merge.channel_ref(),
                loss,
            });
        }
        // Only once every range is done; the laser free-runs between cycles.
        self.bench.tsl.stop_sweep().await?;

        let wavelength = self.rescaler.target_wavelength_table()?;
        let mut records = Vec::with_capacity(plan.sweep_units().len());
        for unit in plan.sweep_units() {
            let (power, monitor) = self.rescaler.measurement_data(unit)?;
            check_lengths(unit.key(), &wavelength, &power, &monitor)?;
            records.push(MeasurementRecord {
                module: unit.module,
                slot: unit.slot,
                channel: unit.channel,
                range: unit.range,
                rescaled_wavelength: wavelength.clone(),
                rescaled_dut_monitor: monitor,
                rescaled_dut_power: power,
            });
        }

        let added = records.len();
        self.measurements.extend(records);
        self.insertion_loss = traces;
        self.wavelength_table = wavelength;
        info!(added, total = self.measurements.len(), "Measurement complete");
        Ok(added)
    }

    #[instrument(skip(self, plan), err)]
    async fn measure_range(&mut self, plan: &AcquisitionPlan, range: u8) -> StsResult<()> {
        let monitor_unit = *plan
            .monitor_for_range(range)
            .ok_or_else(|| StsError::Configuration(format!("no monitor unit for range {range}")))?;
        let bench = self.bench.clone();
        bench.mpm.set_range(range).await?;
        self.run_cycle().await?;

        for unit in plan.units_for_range(range) {
            let log = bench.mpm.channel_log_data(unit.slot, unit.channel).await?;
            debug!(
                slot = unit.slot,
                channel = unit.channel,
                sweep_index = unit.sweep_index,
                points = log.len(),
                "Channel log read"
            );
            self.rescaler.add_measurement_channel_data(&log, unit)?;
        }
        let samples = bench.spu.sampling_data().await?;
        self.rescaler
            .add_measurement_monitor_data(&samples.trigger, &samples.monitor, &monitor_unit)?;
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop the laser (best effort) and disconnect every device.
    #[instrument(skip(self), err)]
    pub async fn shutdown(&mut self) -> StsResult<()> {
        if let Err(e) = self.bench.tsl.stop_sweep().await {
            warn!(error = %e, "Best-effort laser stop failed");
        }
        self.bench.disconnect_all().await
    }
}
