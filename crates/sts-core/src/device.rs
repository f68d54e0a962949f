//! Device kinds, communication interfaces and the capability table.
//!
//! Which interface a device may be reached through is a property of its kind
//! (and for some laser models, of the model). The table lives here so that
//! configuration validation and the transport layer agree on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three instruments taking part in a swept test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Tunable laser source.
    Tsl,
    /// Optical power meter.
    Mpm,
    /// DAQ board sampling the wavelength monitor.
    Spu,
}

impl DeviceKind {
    /// All device kinds in connection order.
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Tsl, DeviceKind::Mpm, DeviceKind::Spu];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Tsl => write!(f, "TSL"),
            DeviceKind::Mpm => write!(f, "MPM"),
            DeviceKind::Spu => write!(f, "SPU"),
        }
    }
}

/// Physical communication interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    /// GPIB, reached through a GPIB-Ethernet bridge.
    Gpib,
    /// TCP socket.
    Lan,
    /// USB serial port.
    Usb,
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Gpib => write!(f, "GPIB"),
            Interface::Lan => write!(f, "LAN"),
            Interface::Usb => write!(f, "USB"),
        }
    }
}

/// Interfaces each device kind can be reached through.
pub fn supported_interfaces(kind: DeviceKind) -> &'static [Interface] {
    match kind {
        DeviceKind::Tsl => &[Interface::Gpib, Interface::Lan, Interface::Usb],
        DeviceKind::Mpm => &[Interface::Gpib, Interface::Lan],
        // The DAQ board is a local USB device; LAN is the sampling bridge.
        DeviceKind::Spu => &[Interface::Usb, Interface::Lan],
    }
}

/// True if `kind` may be reached through `interface`.
pub fn supports_interface(kind: DeviceKind, interface: Interface) -> bool {
    supported_interfaces(kind).contains(&interface)
}

/// Laser models restricted to GPIB.
pub const GPIB_ONLY_TSL_MODELS: [&str; 3] = ["TSL-510", "TSL-550", "TSL-710"];

/// True if the laser model (as reported by its identity string) can only be
/// driven over GPIB.
pub fn tsl_model_is_gpib_only(model: &str) -> bool {
    GPIB_ONLY_TSL_MODELS
        .iter()
        .any(|m| model.to_ascii_uppercase().contains(m))
}

/// Number of module slots in the power meter main frame.
pub const MPM_SLOT_COUNT: u8 = 5;

/// Highest optical power the laser may be set to, in dBm.
pub const MAX_TSL_POWER_DBM: f64 = 10.0;

/// Lowest power a dynamic range resolves, in dBm. Range 1 is the least
/// sensitive; each further range reaches 10 dB lower.
pub fn dynamic_range_floor_dbm(range: u8) -> f64 {
    -30.0 - 10.0 * f64::from(range.saturating_sub(1))
}

/// Power meter module installed in a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    /// MPM-211, four channels, five ranges.
    Mpm211,
    /// MPM-212, two channels.
    Mpm212,
    /// MPM-213, four ranges.
    Mpm213,
    /// MPM-215, single range, cannot be mixed with other modules.
    Mpm215,
    /// Any other module reported by the frame.
    Other(String),
}

impl ModuleType {
    /// Parse the module identifier reported by the power meter. Returns `None`
    /// for empty slots.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.trim().to_ascii_uppercase();
        if id.is_empty() || id == "0" || id == "NONE" || id == "EMPTY" {
            return None;
        }
        let module = if id.contains("211") {
            ModuleType::Mpm211
        } else if id.contains("212") {
            ModuleType::Mpm212
        } else if id.contains("213") {
            ModuleType::Mpm213
        } else if id.contains("215") {
            ModuleType::Mpm215
        } else {
            ModuleType::Other(id)
        };
        Some(module)
    }

    /// Optical channels provided by the module.
    pub fn channels(&self) -> Vec<u8> {
        match self {
            ModuleType::Mpm212 => vec![1, 2],
            _ => vec![1, 2, 3, 4],
        }
    }

    /// Dynamic ranges supported by the module.
    pub fn dynamic_ranges(&self) -> Vec<u8> {
        match self {
            ModuleType::Mpm215 => vec![1],
            ModuleType::Mpm213 => vec![1, 2, 3, 4],
            _ => vec![1, 2, 3, 4, 5],
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleType::Mpm211 => write!(f, "MPM-211"),
            ModuleType::Mpm212 => write!(f, "MPM-212"),
            ModuleType::Mpm213 => write!(f, "MPM-213"),
            ModuleType::Mpm215 => write!(f, "MPM-215"),
            ModuleType::Other(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_table_matches_hardware() {
        assert!(supports_interface(DeviceKind::Tsl, Interface::Usb));
        assert!(!supports_interface(DeviceKind::Mpm, Interface::Usb));
        assert!(supports_interface(DeviceKind::Spu, Interface::Usb));
        assert!(!supports_interface(DeviceKind::Spu, Interface::Gpib));
    }

    #[test]
    fn gpib_only_models_are_detected_from_identity() {
        assert!(tsl_model_is_gpib_only("SANTEC,TSL-550,12345,1.0"));
        assert!(!tsl_model_is_gpib_only("SANTEC,TSL-570,12345,1.0"));
    }

    #[test]
    fn module_channels_and_ranges() {
        assert_eq!(ModuleType::Mpm212.channels(), vec![1, 2]);
        assert_eq!(ModuleType::Mpm211.channels(), vec![1, 2, 3, 4]);
        assert_eq!(ModuleType::Mpm215.dynamic_ranges(), vec![1]);
        assert_eq!(ModuleType::Mpm213.dynamic_ranges(), vec![1, 2, 3, 4]);
        assert_eq!(ModuleType::Mpm211.dynamic_ranges(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn range_floors_step_by_ten_db() {
        assert_eq!(dynamic_range_floor_dbm(1), -30.0);
        assert_eq!(dynamic_range_floor_dbm(5), -70.0);
    }

    #[test]
    fn module_identifiers_parse() {
        assert_eq!(ModuleType::parse("MPM-212"), Some(ModuleType::Mpm212));
        assert_eq!(ModuleType::parse(" mpm-215 "), Some(ModuleType::Mpm215));
        assert_eq!(ModuleType::parse(""), None);
        assert_eq!(ModuleType::parse("0"), None);
        assert_eq!(
            ModuleType::parse("MPM-219"),
            Some(ModuleType::Other("MPM-219".into()))
        );
    }
}
