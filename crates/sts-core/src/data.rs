//! Acquisition data model.
//!
//! Bookkeeping units (`SweepUnit`, `MergeUnit`) describe what a session will
//! measure; records (`ReferenceRecord`, `MeasurementRecord`) hold what it
//! measured. Only records outlive a session, so only records carry the
//! persisted field names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Module number used in single power meter deployments.
pub const DEFAULT_MODULE: u8 = 0;

/// One optical path on one power meter module.
///
/// Serialized as a `[slot, channel]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(u8, u8)", into = "(u8, u8)")]
pub struct ChannelRef {
    /// Module slot in the power meter frame.
    pub slot: u8,
    /// Channel within the module.
    pub channel: u8,
}

impl ChannelRef {
    /// Construct a channel reference.
    pub const fn new(slot: u8, channel: u8) -> Self {
        Self { slot, channel }
    }
}

impl From<(u8, u8)> for ChannelRef {
    fn from((slot, channel): (u8, u8)) -> Self {
        Self { slot, channel }
    }
}

impl From<ChannelRef> for (u8, u8) {
    fn from(value: ChannelRef) -> Self {
        (value.slot, value.channel)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot{}Ch{}", self.slot, self.channel)
    }
}

/// Identity shared by everything measured on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Power meter number.
    pub module: u8,
    /// Slot and channel.
    pub channel: ChannelRef,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MPM{}:{}", self.module, self.channel)
    }
}

/// One (range, channel) combination scheduled for measurement.
///
/// All units sharing a `sweep_index` are filled by the same physical sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SweepUnit {
    /// Power meter number.
    pub module: u8,
    /// Module slot.
    pub slot: u8,
    /// Channel within the module.
    pub channel: u8,
    /// Dynamic range the sweep runs at.
    pub range: u8,
    /// 1-based sweep number, one per distinct range.
    pub sweep_index: usize,
    /// State of polarization. Always 0; reserved for polarization-resolved runs.
    pub sop: u8,
}

impl SweepUnit {
    /// Slot and channel of the unit.
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(self.slot, self.channel)
    }

    /// Channel identity without the range.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            module: self.module,
            channel: self.channel_ref(),
        }
    }
}

/// A sweep unit that also receives the DAQ monitor trace.
pub type MonitorUnit = SweepUnit;

/// Identity used to request the insertion-loss merge of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergeUnit {
    /// Power meter number.
    pub module: u8,
    /// Module slot.
    pub slot: u8,
    /// Channel within the module.
    pub channel: u8,
}

impl MergeUnit {
    /// Slot and channel of the unit.
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(self.slot, self.channel)
    }
}

/// Baseline capture for one channel, without the device under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Power meter number.
    #[serde(rename = "MPMNumber")]
    pub module: u8,
    /// Module slot.
    #[serde(rename = "SlotNumber")]
    pub slot: u8,
    /// Channel within the module.
    #[serde(rename = "ChannelNumber")]
    pub channel: u8,
    /// Raw logged power.
    #[serde(default)]
    pub log_data: Vec<f64>,
    /// Raw DAQ trigger samples.
    #[serde(default)]
    pub trigger: Vec<f64>,
    /// Raw DAQ monitor samples.
    #[serde(default)]
    pub monitor: Vec<f64>,
    /// Monitor trace on the target wavelength table.
    #[serde(default)]
    pub rescaled_monitor: Vec<f64>,
    /// Target wavelength table.
    #[serde(default)]
    pub rescaled_wavelength: Vec<f64>,
    /// Reference power on the target wavelength table.
    #[serde(default)]
    pub rescaled_reference_power: Vec<f64>,
}

impl ReferenceRecord {
    /// Empty record for a channel.
    pub fn shell(module: u8, channel: ChannelRef) -> Self {
        Self {
            module,
            slot: channel.slot,
            channel: channel.channel,
            log_data: Vec::new(),
            trigger: Vec::new(),
            monitor: Vec::new(),
            rescaled_monitor: Vec::new(),
            rescaled_wavelength: Vec::new(),
            rescaled_reference_power: Vec::new(),
        }
    }

    /// Slot and channel of the record.
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(self.slot, self.channel)
    }

    /// Channel identity of the record.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            module: self.module,
            channel: self.channel_ref(),
        }
    }

    /// True once the raw arrays needed for rescaling are present.
    pub fn has_raw_data(&self) -> bool {
        !self.log_data.is_empty() && !self.trigger.is_empty() && !self.monitor.is_empty()
    }

    /// True once rescaled arrays are present.
    pub fn is_rescaled(&self) -> bool {
        !self.rescaled_wavelength.is_empty()
    }
}

/// Rescaled DUT capture for one channel at one range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Power meter number.
    #[serde(rename = "MPMNumber")]
    pub module: u8,
    /// Module slot.
    #[serde(rename = "SlotNumber")]
    pub slot: u8,
    /// Channel within the module.
    #[serde(rename = "ChannelNumber")]
    pub channel: u8,
    /// Dynamic range.
    #[serde(rename = "RangeNumber")]
    pub range: u8,
    /// Target wavelength table.
    pub rescaled_wavelength: Vec<f64>,
    /// DUT monitor trace on the target wavelength table.
    pub rescaled_dut_monitor: Vec<f64>,
    /// DUT power on the target wavelength table.
    pub rescaled_dut_power: Vec<f64>,
}

impl MeasurementRecord {
    /// Slot and channel of the record.
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(self.slot, self.channel)
    }
}

/// Merged insertion loss for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionLossTrace {
    /// Power meter number.
    pub module: u8,
    /// Slot and channel.
    pub channel: ChannelRef,
    /// Insertion loss in dB, one value per target wavelength.
    pub loss: Vec<f64>,
}
