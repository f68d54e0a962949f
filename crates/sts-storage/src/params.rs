//! The parameter record of the last scan.
//!
//! Lets the next session repeat a scan with the same sweep, channels and
//! ranges, which is also what makes the cached reference reusable.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use sts_core::config::SweepSettings;
use sts_core::{ChannelRef, StsResult};

/// File name of the parameter record.
pub const PARAMS_FILE: &str = "last_scan_params.json";

/// Sweep and selection of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    /// Selected channels as `[slot, channel]` pairs.
    #[serde(rename = "selected_chans")]
    pub channels: Vec<ChannelRef>,
    /// Selected dynamic ranges.
    #[serde(rename = "selected_ranges")]
    pub ranges: Vec<u8>,
    /// nm
    pub start_wavelength: f64,
    /// nm
    pub stop_wavelength: f64,
    /// Requested step, nm.
    pub sweep_step: f64,
    /// nm/s
    pub sweep_speed: f64,
    /// Laser power, dBm.
    pub power: f64,
    /// Trigger step the laser used, nm.
    pub actual_step: f64,
}

impl ScanParameters {
    /// Record a scan.
    pub fn new(
        sweep: &SweepSettings,
        actual_step_nm: f64,
        channels: &[ChannelRef],
        ranges: &[u8],
    ) -> Self {
        Self {
            channels: channels.to_vec(),
            ranges: ranges.to_vec(),
            start_wavelength: sweep.start_nm,
            stop_wavelength: sweep.stop_nm,
            sweep_step: sweep.step_nm,
            sweep_speed: sweep.speed_nm_per_s,
            power: sweep.power_dbm,
            actual_step: actual_step_nm,
        }
    }

    /// Sweep settings to configure the laser with.
    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            start_nm: self.start_wavelength,
            stop_nm: self.stop_wavelength,
            step_nm: self.sweep_step,
            speed_nm_per_s: self.sweep_speed,
            power_dbm: self.power,
        }
    }

    /// Read a record. `None` when the file does not exist.
    pub fn load(path: &Path) -> StsResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        let params: Self = serde_json::from_reader(reader)?;
        params.sweep_settings().validate()?;
        Ok(Some(params))
    }

    /// Write the record as indented JSON.
    pub fn save(&self, path: &Path) -> StsResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
