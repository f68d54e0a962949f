//! Fault injection for the simulated bench.
//!
//! Scenarios either fail a named operation (`FailOnCall`, `FailAfterN`,
//! `CommunicationLoss`) or change how the simulated hardware behaves
//! (`SweepNeverArms`, `SweepNeverReturns`, `NoTrigger`, `SamplingStalls`).
//! Operation names follow the call log: `"tsl.start_sweep"`,
//! `"mpm.start_logging"`, `"spu.wait_for_sampling"` and so on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use sts_core::{DeviceKind, InstrumentStatus, StsError, StsResult};

/// Error produced by an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `StsError::Connection`
    Connection,
    /// `StsError::Parameter`
    Parameter,
    /// `StsError::Device` with the given status
    Device(InstrumentStatus),
}

/// Injected failure or misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// Fail the `call`-th invocation (1-based) of `operation` only.
    FailOnCall {
        /// Operation name
        operation: &'static str,
        /// 1-based invocation to fail
        call: u32,
        /// Error to raise
        kind: FaultKind,
    },
    /// Fail every invocation of `operation` after `count` successful ones.
    FailAfterN {
        /// Operation name
        operation: &'static str,
        /// Successful invocations before failing
        count: u32,
    },
    /// Every operation fails once `after` calls have been made in total.
    CommunicationLoss {
        /// Calls that still succeed
        after: u32,
    },
    /// The laser accepts sweep starts but never reports WaitingForTrigger.
    SweepNeverArms,
    /// The laser never returns to Standby after a triggered sweep.
    SweepNeverReturns,
    /// The trigger cable is unplugged: the meter logs nothing.
    NoTrigger,
    /// The sampler never reports completion.
    SamplingStalls,
}

#[derive(Default, Debug)]
struct FaultState {
    operation_counts: HashMap<&'static str, u32>,
    total_calls: u32,
}

/// Fault configuration shared by the simulated devices of one bench.
#[derive(Clone, Debug, Default)]
pub struct FaultConfig {
    scenarios: Arc<Vec<FaultScenario>>,
    state: Arc<Mutex<FaultState>>,
}

impl FaultConfig {
    /// No injected faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, evaluated in order.
    pub fn scenarios(scenarios: Vec<FaultScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            state: Arc::default(),
        }
    }

    /// True if the behavioural scenario is active.
    pub fn has(&self, scenario: &FaultScenario) -> bool {
        self.scenarios.contains(scenario)
    }

    fn state(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a call of `operation` and return the injected error, if any.
    pub fn check_operation(&self, device: DeviceKind, operation: &'static str) -> StsResult<()> {
        let mut state = self.state();
        state.total_calls += 1;
        let total = state.total_calls;
        let count = {
            let current = state.operation_counts.entry(operation).or_insert(0);
            *current += 1;
            *current
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::CommunicationLoss { after } if total > *after => {
                    return Err(fault(device, operation, FaultKind::Device(InstrumentStatus::CommunicationFailure)));
                }
                FaultScenario::FailOnCall {
                    operation: op,
                    call,
                    kind,
                } if *op == operation && *call == count => {
                    return Err(fault(device, operation, *kind));
                }
                FaultScenario::FailAfterN { operation: op, count: n }
                    if *op == operation && count > *n =>
                {
                    return Err(fault(device, operation, FaultKind::Device(InstrumentStatus::Failure)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Number of times `operation` was checked.
    pub fn operation_count(&self, operation: &str) -> u32 {
        self.state()
            .operation_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Clear counters.
    pub fn reset(&self) {
        *self.state() = FaultState::default();
    }
}

fn fault(device: DeviceKind, operation: &str, kind: FaultKind) -> StsError {
    let message = format!("injected failure on '{operation}'");
    match kind {
        FaultKind::Connection => StsError::connection(device, message),
        FaultKind::Parameter => StsError::parameter(device, message),
        FaultKind::Device(status) => StsError::device(device, status, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_faults() {
        let faults = FaultConfig::none();
        for _ in 0..20 {
            assert!(faults.check_operation(DeviceKind::Tsl, "tsl.start_sweep").is_ok());
        }
        assert_eq!(faults.operation_count("tsl.start_sweep"), 20);
    }

    #[test]
    fn fail_on_call_hits_one_invocation() {
        let faults = FaultConfig::scenario(FaultScenario::FailOnCall {
            operation: "mpm.start_logging",
            call: 2,
            kind: FaultKind::Device(InstrumentStatus::DeviceError),
        });
        assert!(faults.check_operation(DeviceKind::Mpm, "mpm.start_logging").is_ok());
        let err = faults
            .check_operation(DeviceKind::Mpm, "mpm.start_logging")
            .unwrap_err();
        assert!(matches!(
            err,
            StsError::Device {
                device: DeviceKind::Mpm,
                status: InstrumentStatus::DeviceError,
                ..
            }
        ));
        assert!(faults.check_operation(DeviceKind::Mpm, "mpm.start_logging").is_ok());
    }

    #[test]
    fn fail_after_n() {
        let faults = FaultConfig::scenario(FaultScenario::FailAfterN {
            operation: "spu.start_sampling",
            count: 3,
        });
        for _ in 0..3 {
            assert!(faults.check_operation(DeviceKind::Spu, "spu.start_sampling").is_ok());
        }
        assert!(faults.check_operation(DeviceKind::Spu, "spu.start_sampling").is_err());
        assert!(faults.check_operation(DeviceKind::Spu, "spu.stop_sampling").is_ok());
    }

    #[test]
    fn communication_loss_fails_everything_afterwards() {
        let faults = FaultConfig::scenario(FaultScenario::CommunicationLoss { after: 1 });
        assert!(faults.check_operation(DeviceKind::Tsl, "tsl.connect").is_ok());
        assert!(matches!(
            faults.check_operation(DeviceKind::Mpm, "mpm.connect"),
            Err(StsError::Device {
                status: InstrumentStatus::CommunicationFailure,
                ..
            })
        ));
    }

    #[test]
    fn reset_clears_counters() {
        let faults = FaultConfig::scenario(FaultScenario::FailAfterN {
            operation: "tsl.connect",
            count: 1,
        });
        assert!(faults.check_operation(DeviceKind::Tsl, "tsl.connect").is_ok());
        faults.reset();
        assert!(faults.check_operation(DeviceKind::Tsl, "tsl.connect").is_ok());
        assert!(faults.has(&FaultScenario::FailAfterN {
            operation: "tsl.connect",
            count: 1
        }));
    }
}
