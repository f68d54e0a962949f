//! `sts-experiment`
//!
//! The acquisition engine of the insertion-loss swept test.
//!
//! - [`orchestrator`]: [`SweepOrchestrator`] runs sweep cycles and the
//!   reference and measurement phases built on them
//! - [`rescaling`]: the [`RescalingService`] contract and [`LinearRescaler`]
//! - [`operator`]: prompts for the person at the bench
//!
//! # Example
//!
//! ```rust,ignore
//! let mut orchestrator = SweepOrchestrator::new(bench, Box::new(LinearRescaler::new()), timeouts);
//! orchestrator.configure_laser(settings).await?;
//! orchestrator.configure_acquisition().await?;
//! orchestrator.set_plan(AcquisitionPlan::build(&channels, &ranges)?)?;
//! orchestrator.run_reference(&AutoOperator).await?;
//! orchestrator.run_measurement().await?;
//! ```

pub mod operator;
pub mod orchestrator;
pub mod rescaling;

pub use operator::{AutoOperator, Operator};
pub use orchestrator::{ConfiguredSweep, CycleState, SweepOrchestrator};
pub use rescaling::{LinearRescaler, RescaledPair, RescalingMode, RescalingService};
