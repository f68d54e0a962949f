//! `sts-core`
//!
//! Shared types for the insertion-loss swept test.
//!
//! ## Modules
//!
//! - [`error`]: `StsError` and the vendor status taxonomies
//! - [`device`]: device kinds, interfaces and the capability table
//! - [`data`]: sweep units and the reference / measurement records
//! - [`selection`]: channel and range selection
//! - [`plan`]: the per-session [`AcquisitionPlan`]
//! - [`config`]: Figment-based configuration
//!
//! ## Example
//!
//! ```rust
//! use sts_core::{AcquisitionPlan, ChannelRef};
//!
//! let channels = [ChannelRef::new(0, 1), ChannelRef::new(0, 2)];
//! let plan = AcquisitionPlan::build(&channels, &[1, 3])?;
//! assert_eq!(plan.sweep_units().len(), 4);
//! # Ok::<(), sts_core::StsError>(())
//! ```

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod plan;
pub mod selection;

pub use config::{StsConfig, SweepSettings, TimeoutConfig};
pub use data::{
    ChannelRef, InsertionLossTrace, MeasurementRecord, MergeUnit, MonitorUnit, RecordKey,
    ReferenceRecord, SweepUnit,
};
pub use device::{DeviceKind, Interface, ModuleType};
pub use error::{InstrumentStatus, ProcessStatus, StsError, StsResult};
pub use plan::AcquisitionPlan;
pub use selection::{ChannelMatrix, ChannelSelection, RangeSelection};
