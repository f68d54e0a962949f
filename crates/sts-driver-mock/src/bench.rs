//! Simulated test station.
//!
//! The three mock devices share one [`BenchState`] so that a software trigger
//! on the laser completes the meter's logging and the sampler's run, the way
//! the trigger cable couples the real instruments. Every device call is
//! appended to a call log (status polls excepted) before fault injection is
//! consulted, so failed calls are visible in the log too.

use crate::common::{FaultConfig, FaultScenario};
use crate::mock_laser::MockTsl;
use crate::mock_power_meter::MockMpm;
use crate::mock_sampler::MockSpu;
use std::sync::{Arc, Mutex, MutexGuard};
use sts_core::config::SweepSettings;
use sts_core::{DeviceKind, ModuleType, StsResult};
use sts_hardware::{Bench, LoggingStatus, SamplingData, SamplingParameters, SweepStatus};

/// Sampler run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SamplerState {
    Idle,
    Sampling,
    Complete,
}

/// What the meter captured during the last triggered sweep.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoggedSweep {
    pub points: usize,
    pub range: u8,
    pub laser_dbm: f64,
    pub dut_loss_db: f64,
}

#[derive(Debug)]
pub(crate) struct BenchState {
    pub calls: Vec<String>,
    pub power_dbm: f64,
    pub sweep: Option<SweepSettings>,
    pub sweep_status: SweepStatus,
    pub range: u8,
    pub logging_settings: Option<SweepSettings>,
    pub logging: LoggingStatus,
    pub logged: Option<LoggedSweep>,
    pub sampler: SamplerState,
    pub sampling_params: Option<SamplingParameters>,
    pub samples: SamplingData,
    pub dut_loss_db: f64,
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            power_dbm: 0.0,
            sweep: None,
            sweep_status: SweepStatus::Standby,
            range: 1,
            logging_settings: None,
            logging: LoggingStatus::Stopped,
            logged: None,
            sampler: SamplerState::Idle,
            sampling_params: None,
            samples: SamplingData::default(),
            dut_loss_db: 0.0,
        }
    }
}

/// Static description of the simulated hardware.
#[derive(Debug, Clone)]
pub struct MockBenchConfig {
    /// Laser model reported on connect.
    pub laser_model: String,
    /// Laser wavelength limits, nm.
    pub wavelength_range_nm: (f64, f64),
    /// Sweep speed table; empty for models without one.
    pub speed_table: Vec<f64>,
    /// Installed power meter modules by slot.
    pub modules: Vec<(u8, ModuleType)>,
    /// Injected faults.
    pub faults: FaultConfig,
}

impl Default for MockBenchConfig {
    fn default() -> Self {
        Self {
            laser_model: "TSL-570".into(),
            wavelength_range_nm: (1480.0, 1640.0),
            speed_table: vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0],
            modules: vec![(0, ModuleType::Mpm211)],
            faults: FaultConfig::none(),
        }
    }
}

pub(crate) struct Shared {
    pub config: MockBenchConfig,
    state: Mutex<BenchState>,
}

impl Shared {
    pub fn state(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a call and apply fault injection.
    pub fn call(&self, device: DeviceKind, operation: &'static str) -> StsResult<()> {
        self.call_with(device, operation, None)
    }

    /// Record a call with an argument and apply fault injection.
    pub fn call_with(
        &self,
        device: DeviceKind,
        operation: &'static str,
        detail: Option<String>,
    ) -> StsResult<()> {
        let entry = match detail {
            Some(detail) => format!("{operation} {detail}"),
            None => operation.to_string(),
        };
        self.state().calls.push(entry);
        self.config.faults.check_operation(device, operation)
    }

    /// Status queries go through fault injection but not the call log.
    pub fn poll(&self, device: DeviceKind, operation: &'static str) -> StsResult<()> {
        self.config.faults.check_operation(device, operation)
    }

    pub fn has_fault(&self, scenario: &FaultScenario) -> bool {
        self.config.faults.has(scenario)
    }
}

/// A simulated laser, power meter and sampler wired together.
#[derive(Clone)]
pub struct MockBench {
    shared: Arc<Shared>,
}

impl MockBench {
    /// Bench with the default hardware and no faults.
    pub fn new() -> Self {
        Self::with_config(MockBenchConfig::default())
    }

    /// Bench with default hardware and the given faults.
    pub fn with_faults(faults: FaultConfig) -> Self {
        Self::with_config(MockBenchConfig {
            faults,
            ..MockBenchConfig::default()
        })
    }

    /// Bench described by `config`.
    pub fn with_config(config: MockBenchConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BenchState::default()),
            }),
        }
    }

    /// The devices as trait objects, ready for the orchestrator.
    pub fn bench(&self) -> Bench {
        Bench::new(
            Arc::new(MockTsl::new(self.shared.clone())),
            Arc::new(MockMpm::new(self.shared.clone())),
            Arc::new(MockSpu::new(self.shared.clone())),
        )
    }

    /// Every recorded call in order.
    pub fn calls(&self) -> Vec<String> {
        self.shared.state().calls.clone()
    }

    /// Number of recorded calls of `operation`, whatever their arguments.
    pub fn call_count(&self, operation: &str) -> usize {
        self.shared
            .state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.shared.state().calls.clear();
    }

    /// Loss of the device under test, applied to subsequent sweeps.
    ///
    /// Zero models the reference connection (no DUT).
    pub fn set_dut_loss_db(&self, loss_db: f64) {
        self.shared.state().dut_loss_db = loss_db;
    }

    /// Current laser sweep state.
    pub fn sweep_status(&self) -> SweepStatus {
        self.shared.state().sweep_status
    }

    /// Current meter logging state.
    pub fn logging_status(&self) -> LoggingStatus {
        self.shared.state().logging
    }

    /// Injected fault configuration.
    pub fn faults(&self) -> &FaultConfig {
        &self.shared.config.faults
    }
}

impl Default for MockBench {
    fn default() -> Self {
        Self::new()
    }
}
