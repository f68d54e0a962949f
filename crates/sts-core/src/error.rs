//! Error taxonomy for the swept test.
//!
//! `StsError` is the single error type returned by every library crate in the
//! workspace. Each variant corresponds to one failure class the operator or the
//! orchestrator has to treat differently:
//!
//! - **`Connection`**: a device could not be reached. Fatal for that device.
//! - **`Parameter`**: a configuration value was rejected by a device. The whole
//!   configuration step has to be redone.
//! - **`SynchronizationTimeout`**: a bounded wait expired. Usually a wiring or
//!   trigger problem rather than a configuration problem.
//! - **`TriggerCable`**: the power meter saw no triggers during a sweep.
//! - **`MismatchedCache`**: persisted reference data does not fit the current
//!   channel selection.
//! - **`Configuration`** / **`Selection`**: the selection or settings cannot be
//!   used to build an acquisition plan.
//!
//! Vendor status codes are kept as typed enums (`InstrumentStatus`,
//! `ProcessStatus`) so that a numeric code never travels through the code base
//! uninterpreted.

use crate::device::DeviceKind;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the workspace error type.
pub type StsResult<T> = std::result::Result<T, StsError>;

// =============================================================================
// Vendor status codes
// =============================================================================

/// Status codes reported by instrument communication layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentStatus {
    /// Code not recognised.
    Unknown,
    /// Device is in use by another session.
    InUseError,
    /// Parameter rejected by the device.
    ParameterError,
    /// Operation not supported or failed inside the device.
    DeviceError,
    /// Communication with the device failed.
    CommunicationFailure,
    /// Access to the device was refused.
    UnauthorizedAccess,
    /// Low level I/O failure.
    IoException,
    /// Device is not connected.
    NotConnected,
    /// Device is not initialised.
    Uninitialized,
    /// Number of returned points did not match the request.
    CountMismatch,
    /// Device did not answer in time.
    TimeOut,
    /// Unspecified failure.
    Failure,
    /// Operation succeeded.
    Success,
    /// Operation was stopped.
    Stopped,
    /// Device was already connected.
    AlreadyConnected,
}

impl InstrumentStatus {
    /// Map a numeric vendor code onto the taxonomy.
    pub fn from_code(code: i32) -> Self {
        match code {
            -40 => Self::InUseError,
            -30 => Self::ParameterError,
            -20 => Self::DeviceError,
            -14 => Self::CommunicationFailure,
            -13 => Self::UnauthorizedAccess,
            -12 => Self::IoException,
            -11 => Self::NotConnected,
            -10 => Self::Uninitialized,
            -5 => Self::CountMismatch,
            -2 => Self::TimeOut,
            -1 => Self::Failure,
            0 => Self::Success,
            10 => Self::Stopped,
            11 => Self::AlreadyConnected,
            _ => Self::Unknown,
        }
    }

    /// Numeric vendor code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => i32::MIN,
            Self::InUseError => -40,
            Self::ParameterError => -30,
            Self::DeviceError => -20,
            Self::CommunicationFailure => -14,
            Self::UnauthorizedAccess => -13,
            Self::IoException => -12,
            Self::NotConnected => -11,
            Self::Uninitialized => -10,
            Self::CountMismatch => -5,
            Self::TimeOut => -2,
            Self::Failure => -1,
            Self::Success => 0,
            Self::Stopped => 10,
            Self::AlreadyConnected => 11,
        }
    }
}

impl std::fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "Unknown",
            Self::InUseError => "InUseError",
            Self::ParameterError => "ParameterError",
            Self::DeviceError => "DeviceError",
            Self::CommunicationFailure => "CommunicationFailure",
            Self::UnauthorizedAccess => "UnauthorizedAccess",
            Self::IoException => "IOException",
            Self::NotConnected => "NotConnected",
            Self::Uninitialized => "Uninitialized",
            Self::CountMismatch => "CountMismatch",
            Self::TimeOut => "TimeOut",
            Self::Failure => "Failure",
            Self::Success => "Success",
            Self::Stopped => "Stopped",
            Self::AlreadyConnected => "AlreadyConnected",
        };
        write!(f, "{}: {}", self.code(), label)
    }
}

/// Status codes reported by the rescaling service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    /// Code not recognised.
    Unknown,
    /// Measurement data does not match the registered tables.
    MeasureNotMatch,
    /// Measurement data has not been rescaled yet.
    MeasureNotRescaling,
    /// No measurement data registered for the requested unit.
    MeasureNotExist,
    /// Reference data does not match the registered tables.
    ReferenceNotMatch,
    /// Reference data has not been rescaled yet.
    ReferenceNotRescaling,
    /// No reference data registered for the requested unit.
    ReferenceNotExist,
    /// Merge requested before anything was calculated.
    NoCalculated,
    /// Invalid argument.
    ParameterError,
    /// Unspecified failure.
    Failure,
    /// Operation succeeded.
    Success,
}

impl ProcessStatus {
    /// Map a numeric rescaling code onto the taxonomy.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1115 => Self::MeasureNotMatch,
            -1114 => Self::MeasureNotRescaling,
            -1113 => Self::MeasureNotExist,
            -1112 => Self::ReferenceNotMatch,
            -1111 => Self::ReferenceNotRescaling,
            -1110 => Self::ReferenceNotExist,
            -1000 => Self::NoCalculated,
            -30 => Self::ParameterError,
            -1 => Self::Failure,
            0 => Self::Success,
            _ => Self::Unknown,
        }
    }

    /// Numeric rescaling code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => i32::MIN,
            Self::MeasureNotMatch => -1115,
            Self::MeasureNotRescaling => -1114,
            Self::MeasureNotExist => -1113,
            Self::ReferenceNotMatch => -1112,
            Self::ReferenceNotRescaling => -1111,
            Self::ReferenceNotExist => -1110,
            Self::NoCalculated => -1000,
            Self::ParameterError => -30,
            Self::Failure => -1,
            Self::Success => 0,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "Unknown",
            Self::MeasureNotMatch => "MeasureNotMatch",
            Self::MeasureNotRescaling => "MeasureNotRescaling",
            Self::MeasureNotExist => "MeasureNotExist",
            Self::ReferenceNotMatch => "ReferenceNotMatch",
            Self::ReferenceNotRescaling => "ReferenceNotRescaling",
            Self::ReferenceNotExist => "ReferenceNotExist",
            Self::NoCalculated => "NoCalculated",
            Self::ParameterError => "ParameterError",
            Self::Failure => "Failure",
            Self::Success => "Success",
        };
        write!(f, "{}: {}", self.code(), label)
    }
}

// =============================================================================
// StsError
// =============================================================================

/// Primary error type for the swept test.
///
/// # Error Categories
///
/// 1. **Hardware** - `Connection`, `Parameter`, `SynchronizationTimeout`,
///    `TriggerCable`, `Device`
///    - Raised by adapters on any non-zero device status
///    - Never retried inside the workspace; retry is a caller decision
///
/// 2. **Selection / configuration** - `Configuration`, `Selection`,
///    `MismatchedCache`, `Config`
///    - Raised before any sweep is started
///    - Recovery: fix the selection or the configuration file
///
/// 3. **Processing / persistence** - `Rescaling`, `DataIntegrity`,
///    `Persistence`, `Io`
#[derive(Error, Debug)]
pub enum StsError {
    /// Communication with a device could not be established.
    #[error("{device} connection error: {message}")]
    Connection {
        /// Device that failed.
        device: DeviceKind,
        /// Human readable detail.
        message: String,
    },

    /// A configuration value was rejected.
    #[error("{device} parameter error: {message}")]
    Parameter {
        /// Device that rejected the value.
        device: DeviceKind,
        /// Human readable detail.
        message: String,
    },

    /// A bounded wait did not observe its target state.
    #[error("{device} did not reach '{target}' within {} ms", timeout.as_millis())]
    SynchronizationTimeout {
        /// Device that was waited on.
        device: DeviceKind,
        /// State that was expected.
        target: String,
        /// Bound that expired.
        timeout: Duration,
    },

    /// The power meter received no triggers during the sweep.
    #[error("MPM trigger received an error! Please check trigger cable connection.")]
    TriggerCable,

    /// Persisted reference data does not match the current selection.
    #[error("Cached reference data does not match the current selection: {0}")]
    MismatchedCache(String),

    /// Selection or settings cannot be turned into an acquisition plan.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A requested channel or range is not available.
    #[error("Selection error: {0}")]
    Selection(String),

    /// A device reported a non-zero status.
    #[error("{device} device error ({status}): {message}")]
    Device {
        /// Device that reported the status.
        device: DeviceKind,
        /// Vendor status.
        status: InstrumentStatus,
        /// Human readable detail.
        message: String,
    },

    /// The rescaling service reported a non-zero status.
    #[error("Rescaling error during {operation}: {status}")]
    Rescaling {
        /// Rescaling operation that failed.
        operation: &'static str,
        /// Rescaling status.
        status: ProcessStatus,
    },

    /// Rescaled arrays do not line up with the wavelength table.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Persisted data could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration file could not be parsed.
    #[error("Configuration file error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StsError {
    /// Build a `Connection` error.
    pub fn connection(device: DeviceKind, message: impl Into<String>) -> Self {
        Self::Connection {
            device,
            message: message.into(),
        }
    }

    /// Build a `Parameter` error.
    pub fn parameter(device: DeviceKind, message: impl Into<String>) -> Self {
        Self::Parameter {
            device,
            message: message.into(),
        }
    }

    /// Build a `SynchronizationTimeout` error.
    pub fn timeout(device: DeviceKind, target: impl Into<String>, timeout: Duration) -> Self {
        Self::SynchronizationTimeout {
            device,
            target: target.into(),
            timeout,
        }
    }

    /// Build a `Device` error from a vendor status.
    pub fn device(device: DeviceKind, status: InstrumentStatus, message: impl Into<String>) -> Self {
        Self::Device {
            device,
            status,
            message: message.into(),
        }
    }

    /// True for bounded waits that expired.
    pub fn is_synchronization_timeout(&self) -> bool {
        matches!(self, Self::SynchronizationTimeout { .. })
    }

    /// True when the operator can fix the cause and redo the phase without
    /// restarting the session (cabling, selection, configuration values).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SynchronizationTimeout { .. }
                | Self::TriggerCable
                | Self::Parameter { .. }
                | Self::Selection(_)
                | Self::MismatchedCache(_)
        )
    }

    /// Device the error originated from, when there is one.
    pub fn device_kind(&self) -> Option<DeviceKind> {
        match self {
            Self::Connection { device, .. }
            | Self::Parameter { device, .. }
            | Self::SynchronizationTimeout { device, .. }
            | Self::Device { device, .. } => Some(*device),
            Self::TriggerCable => Some(DeviceKind::Mpm),
            _ => None,
        }
    }
}

impl From<figment::Error> for StsError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}

impl From<serde_json::Error> for StsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}
