//! Rescaling service contract and a deterministic linear implementation.
//!
//! The orchestrator only ever asks the service to accept raw arrays, rescale
//! them and hand back wavelength-aligned results; it never looks at the
//! numbers. Every operation reports failure as [`StsError::Rescaling`] with a
//! [`ProcessStatus`].
//!
//! [`LinearRescaler`] is not the vendor algorithm. It exists so that the
//! simulated bench and the tests produce meaningful insertion loss:
//! - trigger edges select one monitor sample per laser trigger
//! - logged points are linearly resampled from the sweep wavelength table
//!   onto the target wavelength table
//! - insertion loss is monitor-normalised reference power minus DUT power
//! - the range merge takes, per wavelength, the lowest range whose reading is
//!   above that range's floor

use std::collections::{BTreeMap, HashMap};
use sts_core::config::points_between;
use sts_core::device::dynamic_range_floor_dbm;
use sts_core::{MergeUnit, MonitorUnit, ProcessStatus, RecordKey, StsError, StsResult, SweepUnit};

/// How monitor samples relate to laser triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RescalingMode {
    /// The DAQ free-runs; trigger edges in the trigger channel mark the points.
    #[default]
    FreerunSpu,
    /// The DAQ samples once per trigger; samples are points already.
    Triggered,
}

/// Rescaled power and monitor arrays on the target wavelength table.
pub type RescaledPair = (Vec<f64>, Vec<f64>);

/// Black-box numeric service turning raw sweep data into wavelength-aligned
/// traces.
///
/// Stateful and single-caller: the orchestrator never calls it concurrently.
pub trait RescalingService: Send {
    /// Drop all reference data.
    fn clear_reference(&mut self) -> StsResult<()>;

    /// Drop all measurement data.
    fn clear_measurement(&mut self) -> StsResult<()>;

    /// Wavelength of each laser trigger.
    fn make_sweep_wavelength_table(
        &mut self,
        start_nm: f64,
        stop_nm: f64,
        actual_step_nm: f64,
    ) -> StsResult<()>;

    /// Wavelength grid the results are rescaled onto.
    fn make_target_wavelength_table(&mut self, start_nm: f64, stop_nm: f64, step_nm: f64)
        -> StsResult<()>;

    /// Select how monitor samples are interpreted.
    fn set_rescaling_mode(
        &mut self,
        mode: RescalingMode,
        averaging_time_ms: f64,
        monitor_averaging: bool,
    ) -> StsResult<()>;

    /// Register the raw logged power of a reference channel.
    fn add_reference_channel_data(&mut self, log: &[f64], unit: &SweepUnit) -> StsResult<()>;

    /// Register the raw monitor capture of a reference channel.
    fn add_reference_monitor_data(
        &mut self,
        trigger: &[f64],
        monitor: &[f64],
        unit: &MonitorUnit,
    ) -> StsResult<()>;

    /// Rescale every registered reference channel.
    fn rescale_reference(&mut self) -> StsResult<()>;

    /// Register the raw logged power of one channel at one range.
    fn add_measurement_channel_data(&mut self, log: &[f64], unit: &SweepUnit) -> StsResult<()>;

    /// Register the monitor capture shared by all channels of one sweep.
    fn add_measurement_monitor_data(
        &mut self,
        trigger: &[f64],
        monitor: &[f64],
        unit: &MonitorUnit,
    ) -> StsResult<()>;

    /// Rescale every registered measurement.
    fn rescale_measurement(&mut self) -> StsResult<()>;

    /// Combine all ranges of one channel into an insertion-loss trace.
    fn merge_ranges(&mut self, unit: &MergeUnit) -> StsResult<Vec<f64>>;

    /// The target wavelength table.
    fn target_wavelength_table(&self) -> StsResult<Vec<f64>>;

    /// Rescaled reference power and monitor of a channel.
    fn reference_data(&self, unit: &SweepUnit) -> StsResult<RescaledPair>;

    /// Rescaled DUT power and monitor of a channel at a range.
    fn measurement_data(&self, unit: &SweepUnit) -> StsResult<RescaledPair>;
}

#[derive(Debug, Default, Clone)]
struct Capture {
    log: Vec<f64>,
    monitor: Vec<f64>,
    rescaled: Option<RescaledPair>,
}

/// Deterministic rescaler based on linear interpolation.
#[derive(Debug, Default)]
pub struct LinearRescaler {
    sweep_table: Vec<f64>,
    target_table: Vec<f64>,
    mode: RescalingMode,
    averaging_time_ms: f64,
    monitor_averaging: bool,
    reference: HashMap<RecordKey, Capture>,
    measurement: BTreeMap<(RecordKey, u8), Capture>,
    measurement_monitor: HashMap<u8, Vec<f64>>,
}

fn failed(operation: &'static str, status: ProcessStatus) -> StsError {
    StsError::Rescaling { operation, status }
}

fn grid(start: f64, stop: f64, step: f64) -> Vec<f64> {
    (0..points_between(start, stop, step))
        .map(|i| start + step * i as f64)
        .collect()
}

/// Linear interpolation of `values` (sampled at `from`) at each of `to`.
/// Values outside `from` are held at the nearest end.
fn resample(from: &[f64], values: &[f64], to: &[f64]) -> Vec<f64> {
    to.iter()
        .map(|x| {
            let upper = from.partition_point(|w| w < x);
            if upper == 0 {
                values[0]
            } else if upper >= from.len() {
                values[from.len() - 1]
            } else {
                let (x0, x1) = (from[upper - 1], from[upper]);
                let (y0, y1) = (values[upper - 1], values[upper]);
                if x1 == x0 {
                    y0
                } else {
                    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
                }
            }
        })
        .collect()
}

/// Power corrected for laser output drift seen on the monitor.
fn normalised(power_dbm: f64, monitor: f64) -> f64 {
    if monitor > 0.0 {
        power_dbm - 10.0 * monitor.log10()
    } else {
        power_dbm
    }
}

impl LinearRescaler {
    /// Empty rescaler; tables must be made before data is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Averaging time given with the rescaling mode, ms.
    pub fn averaging_time_ms(&self) -> f64 {
        self.averaging_time_ms
    }

    fn require_tables(&self, operation: &'static str) -> StsResult<()> {
        if self.sweep_table.is_empty() || self.target_table.is_empty() {
            return Err(failed(operation, ProcessStatus::ParameterError));
        }
        Ok(())
    }

    /// One monitor value per laser trigger.
    fn monitor_points(&self, trigger: &[f64], monitor: &[f64]) -> Option<Vec<f64>> {
        if trigger.len() != monitor.len() {
            return None;
        }
        if self.mode == RescalingMode::Triggered {
            return Some(monitor.to_vec());
        }
        let low = trigger.iter().copied().fold(f64::INFINITY, f64::min);
        let high = trigger.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(high > low) {
            return Some(Vec::new());
        }
        let threshold = (low + high) / 2.0;
        let points = (1..trigger.len())
            .filter(|&i| trigger[i - 1] < threshold && trigger[i] >= threshold)
            .map(|edge| {
                if self.monitor_averaging {
                    let high_phase: Vec<f64> = monitor[edge..]
                        .iter()
                        .zip(&trigger[edge..])
                        .take_while(|(_, t)| **t >= threshold)
                        .map(|(m, _)| *m)
                        .collect();
                    high_phase.iter().sum::<f64>() / high_phase.len() as f64
                } else {
                    monitor[edge]
                }
            })
            .collect();
        Some(points)
    }

    fn rescale(&self, capture: &Capture) -> RescaledPair {
        (
            resample(&self.sweep_table, &capture.log, &self.target_table),
            resample(&self.sweep_table, &capture.monitor, &self.target_table),
        )
    }
}

impl RescalingService for LinearRescaler {
    fn clear_reference(&mut self) -> StsResult<()> {
        self.reference.clear();
        Ok(())
    }

    fn clear_measurement(&mut self) -> StsResult<()> {
        self.measurement.clear();
        self.measurement_monitor.clear();
        Ok(())
    }

    fn make_sweep_wavelength_table(
        &mut self,
        start_nm: f64,
        stop_nm: f64,
        actual_step_nm: f64,
    ) -> StsResult<()> {
        let table = grid(start_nm, stop_nm, actual_step_nm);
        if table.len() < 2 {
            return Err(failed("make_sweep_wavelength_table", ProcessStatus::ParameterError));
        }
        self.sweep_table = table;
        Ok(())
    }

    fn make_target_wavelength_table(
        &mut self,
        start_nm: f64,
        stop_nm: f64,
        step_nm: f64,
    ) -> StsResult<()> {
        let table = grid(start_nm, stop_nm, step_nm);
        if table.is_empty() {
            return Err(failed("make_target_wavelength_table", ProcessStatus::ParameterError));
        }
        self.target_table = table;
        Ok(())
    }

    fn set_rescaling_mode(
        &mut self,
        mode: RescalingMode,
        averaging_time_ms: f64,
        monitor_averaging: bool,
    ) -> StsResult<()> {
        if !(averaging_time_ms > 0.0) {
            return Err(failed("set_rescaling_mode", ProcessStatus::ParameterError));
        }
        self.mode = mode;
        self.averaging_time_ms = averaging_time_ms;
        self.monitor_averaging = monitor_averaging;
        Ok(())
    }

    fn add_reference_channel_data(&mut self, log: &[f64], unit: &SweepUnit) -> StsResult<()> {
        const OP: &str = "add_reference_channel_data";
        self.require_tables(OP)?;
        if log.len() != self.sweep_table.len() {
            return Err(failed(OP, ProcessStatus::ReferenceNotMatch));
        }
        let capture = self.reference.entry(unit.key()).or_default();
        capture.log = log.to_vec();
        capture.rescaled = None;
        Ok(())
    }

    fn add_reference_monitor_data(
        &mut self,
        trigger: &[f64],
        monitor: &[f64],
        unit: &MonitorUnit,
    ) -> StsResult<()> {
        const OP: &str = "add_reference_monitor_data";
        self.require_tables(OP)?;
        let points = self
            .monitor_points(trigger, monitor)
            .filter(|p| p.len() == self.sweep_table.len())
            .ok_or_else(|| failed(OP, ProcessStatus::ReferenceNotMatch))?;
        let capture = self.reference.entry(unit.key()).or_default();
        capture.monitor = points;
        capture.rescaled = None;
        Ok(())
    }

    fn rescale_reference(&mut self) -> StsResult<()> {
        const OP: &str = "rescale_reference";
        if self.reference.is_empty()
            || self
                .reference
                .values()
                .any(|c| c.log.is_empty() || c.monitor.is_empty())
        {
            return Err(failed(OP, ProcessStatus::ReferenceNotExist));
        }
        let rescaled: Vec<(RecordKey, RescaledPair)> = self
            .reference
            .iter()
            .map(|(key, capture)| (*key, self.rescale(capture)))
            .collect();
        for (key, pair) in rescaled {
            if let Some(capture) = self.reference.get_mut(&key) {
                capture.rescaled = Some(pair);
            }
        }
        Ok(())
    }

    fn add_measurement_channel_data(&mut self, log: &[f64], unit: &SweepUnit) -> StsResult<()> {
        const OP: &str = "add_measurement_channel_data";
        self.require_tables(OP)?;
        if log.len() != self.sweep_table.len() {
            return Err(failed(OP, ProcessStatus::MeasureNotMatch));
        }
        let capture = self.measurement.entry((unit.key(), unit.range)).or_default();
        capture.log = log.to_vec();
        capture.rescaled = None;
        Ok(())
    }

    fn add_measurement_monitor_data(
        &mut self,
        trigger: &[f64],
        monitor: &[f64],
        unit: &MonitorUnit,
    ) -> StsResult<()> {
        const OP: &str = "add_measurement_monitor_data";
        self.require_tables(OP)?;
        let points = self
            .monitor_points(trigger, monitor)
            .filter(|p| p.len() == self.sweep_table.len())
            .ok_or_else(|| failed(OP, ProcessStatus::MeasureNotMatch))?;
        self.measurement_monitor.insert(unit.range, points);
        Ok(())
    }

    fn rescale_measurement(&mut self) -> StsResult<()> {
        const OP: &str = "rescale_measurement";
        if self.measurement.is_empty() {
            return Err(failed(OP, ProcessStatus::MeasureNotExist));
        }
        let mut rescaled = Vec::with_capacity(self.measurement.len());
        for ((key, range), capture) in &self.measurement {
            let monitor = self
                .measurement_monitor
                .get(range)
                .ok_or_else(|| failed(OP, ProcessStatus::MeasureNotExist))?;
            let pair = (
                resample(&self.sweep_table, &capture.log, &self.target_table),
                resample(&self.sweep_table, monitor, &self.target_table),
            );
            rescaled.push(((*key, *range), pair));
        }
        for (id, pair) in rescaled {
            if let Some(capture) = self.measurement.get_mut(&id) {
                capture.rescaled = Some(pair);
            }
        }
        Ok(())
    }

    fn merge_ranges(&mut self, unit: &MergeUnit) -> StsResult<Vec<f64>> {
        const OP: &str = "merge_ranges";
        let key = RecordKey {
            module: unit.module,
            channel: unit.channel_ref(),
        };
        let reference = self
            .reference
            .get(&key)
            .ok_or_else(|| failed(OP, ProcessStatus::ReferenceNotExist))?;
        let (ref_power, ref_monitor) = reference
            .rescaled
            .as_ref()
            .ok_or_else(|| failed(OP, ProcessStatus::ReferenceNotRescaling))?;

        // BTreeMap order: ascending range for this channel.
        let mut ranges = Vec::new();
        for ((k, range), capture) in &self.measurement {
            if *k != key {
                continue;
            }
            let pair = capture
                .rescaled
                .as_ref()
                .ok_or_else(|| failed(OP, ProcessStatus::MeasureNotRescaling))?;
            ranges.push((*range, pair));
        }
        let Some(&(_, fallback)) = ranges.last() else {
            return Err(failed(OP, ProcessStatus::NoCalculated));
        };

        let loss = (0..self.target_table.len())
            .map(|j| {
                let (dut_power, dut_monitor) = ranges
                    .iter()
                    .find(|(range, (power, _))| power[j] > dynamic_range_floor_dbm(*range))
                    .map_or(fallback, |(_, pair)| *pair);
                normalised(ref_power[j], ref_monitor[j]) - normalised(dut_power[j], dut_monitor[j])
            })
            .collect();
        Ok(loss)
    }

    fn target_wavelength_table(&self) -> StsResult<Vec<f64>> {
        if self.target_table.is_empty() {
            return Err(failed("target_wavelength_table", ProcessStatus::NoCalculated));
        }
        Ok(self.target_table.clone())
    }

    fn reference_data(&self, unit: &SweepUnit) -> StsResult<RescaledPair> {
        const OP: &str = "reference_data";
        self.reference
            .get(&unit.key())
            .ok_or_else(|| failed(OP, ProcessStatus::ReferenceNotExist))?
            .rescaled
            .clone()
            .ok_or_else(|| failed(OP, ProcessStatus::ReferenceNotRescaling))
    }

    fn measurement_data(&self, unit: &SweepUnit) -> StsResult<RescaledPair> {
        const OP: &str = "measurement_data";
        self.measurement
            .get(&(unit.key(), unit.range))
            .ok_or_else(|| failed(OP, ProcessStatus::MeasureNotExist))?
            .rescaled
            .clone()
            .ok_or_else(|| failed(OP, ProcessStatus::MeasureNotRescaling))
    }
}
