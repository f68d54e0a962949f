//! `sts-storage`
//!
//! Files a session reads and leaves behind, all in one output directory:
//!
//! - [`params`]: `last_scan_params.json`, sweep and selection of the last scan
//! - [`reference_cache`]: `last_scan_reference_data.json`, its reference
//!   records with raw arrays
//! - [`export`]: timestamped CSV results
//! - [`archive`]: files about to be overwritten move to the archive
//!   directory first
//!
//! [`ResultStore`] ties them to a [`StorageConfig`].

pub mod archive;
pub mod export;
pub mod params;
pub mod reference_cache;

pub use export::ExportKind;
pub use params::ScanParameters;

use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use sts_core::config::StorageConfig;
use sts_core::{InsertionLossTrace, MeasurementRecord, ReferenceRecord, StsResult};
use tracing::{info, instrument};

/// Result files of one output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    output_dir: PathBuf,
    archive_dir: PathBuf,
}

impl ResultStore {
    /// Store for the configured output directory.
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            archive_dir: config.output_dir.join(&config.archive_dir),
        }
    }

    /// Directory the files are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory previous files are moved to.
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Location of the parameter record.
    pub fn params_path(&self) -> PathBuf {
        self.output_dir.join(params::PARAMS_FILE)
    }

    /// Location of the reference cache.
    pub fn reference_cache_path(&self) -> PathBuf {
        self.output_dir.join(reference_cache::REFERENCE_CACHE_FILE)
    }

    /// Parameter record of the last scan, if any.
    pub fn load_params(&self) -> StsResult<Option<ScanParameters>> {
        ScanParameters::load(&self.params_path())
    }

    /// Reference records of the last scan, if any.
    pub fn load_reference_cache(&self) -> StsResult<Option<Vec<ReferenceRecord>>> {
        reference_cache::load(&self.reference_cache_path())
    }

    /// Path for a new file named `name`, archiving what is there.
    fn prepare(&self, name: &str, now: NaiveDateTime) -> StsResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(name);
        archive::archive_existing(&path, &self.archive_dir, now)?;
        Ok(path)
    }

    /// Write the parameter record.
    #[instrument(skip_all, err)]
    pub fn save_params(&self, params: &ScanParameters, now: NaiveDateTime) -> StsResult<PathBuf> {
        let path = self.prepare(params::PARAMS_FILE, now)?;
        params.save(&path)?;
        info!(path = %path.display(), "Parameters saved");
        Ok(path)
    }

    /// Write the reference cache.
    #[instrument(skip_all, fields(records = records.len()), err)]
    pub fn save_reference_cache(
        &self,
        records: &[ReferenceRecord],
        now: NaiveDateTime,
    ) -> StsResult<PathBuf> {
        let path = self.prepare(reference_cache::REFERENCE_CACHE_FILE, now)?;
        reference_cache::save(&path, records)?;
        info!(path = %path.display(), "Reference cache saved");
        Ok(path)
    }

    fn create_export(&self, kind: ExportKind, now: NaiveDateTime) -> StsResult<(PathBuf, BufWriter<File>)> {
        let path = self.prepare(&kind.file_name(now), now)?;
        let file = BufWriter::new(File::create(&path)?);
        Ok((path, file))
    }

    /// Write the insertion-loss CSV.
    #[instrument(skip_all, err)]
    pub fn export_insertion_loss(
        &self,
        wavelength: &[f64],
        traces: &[InsertionLossTrace],
        now: NaiveDateTime,
    ) -> StsResult<PathBuf> {
        let (path, file) = self.create_export(ExportKind::InsertionLoss, now)?;
        export::write_insertion_loss(file, wavelength, traces)?;
        info!(path = %path.display(), channels = traces.len(), "Insertion loss exported");
        Ok(path)
    }

    /// Write the reference CSV.
    #[instrument(skip_all, err)]
    pub fn export_reference(&self, records: &[ReferenceRecord], now: NaiveDateTime) -> StsResult<PathBuf> {
        let (path, file) = self.create_export(ExportKind::Reference, now)?;
        export::write_reference(file, records)?;
        info!(path = %path.display(), channels = records.len(), "Reference exported");
        Ok(path)
    }

    /// Write the DUT CSV.
    #[instrument(skip_all, err)]
    pub fn export_dut(&self, records: &[MeasurementRecord], now: NaiveDateTime) -> StsResult<PathBuf> {
        let (path, file) = self.create_export(ExportKind::Dut, now)?;
        export::write_dut(file, records)?;
        info!(path = %path.display(), records = records.len(), "DUT data exported");
        Ok(path)
    }
}
