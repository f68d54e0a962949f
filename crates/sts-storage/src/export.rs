//! Human-readable CSV results, one row per target wavelength.
//!
//! | file | columns after `Wavelength(nm)` |
//! |---|---|
//! | insertion loss | `Slot{s}Ch{c}` per channel |
//! | reference | `Slot{s}Ch{c}_TSLPower`, `Slot{s}Ch{c}_MPMPower` per channel |
//! | DUT | `Slot{s}Ch{c}R{r}_TSLPower`, `Slot{s}Ch{c}R{r}_MPMPower` per record |
//!
//! `TSLPower` is the rescaled monitor trace, `MPMPower` the rescaled meter
//! power.

use chrono::NaiveDateTime;
use std::io::Write;
use sts_core::{InsertionLossTrace, MeasurementRecord, ReferenceRecord, StsError, StsResult};

/// Timestamp format used in export file names.
pub const EXPORT_STAMP_FORMAT: &str = "%Y%m%d_%Hhr%Mm%Ssec";

const WAVELENGTH_COLUMN: &str = "Wavelength(nm)";

/// The three result files of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Merged insertion loss.
    InsertionLoss,
    /// Rescaled reference traces.
    Reference,
    /// Rescaled DUT traces per range.
    Dut,
}

impl ExportKind {
    fn stem(self) -> &'static str {
        match self {
            ExportKind::InsertionLoss => "data_measurement",
            ExportKind::Reference => "data_reference",
            ExportKind::Dut => "data_dut",
        }
    }

    /// File name for an export written at `now`.
    pub fn file_name(self, now: NaiveDateTime) -> String {
        format!("{}_{}.csv", self.stem(), now.format(EXPORT_STAMP_FORMAT))
    }
}

fn csv_error(e: csv::Error) -> StsError {
    StsError::Persistence(e.to_string())
}

/// Columns of a table; every column must be as long as `wavelength`.
struct Table<'a> {
    wavelength: &'a [f64],
    columns: Vec<(String, &'a [f64])>,
}

impl Table<'_> {
    fn write<W: Write>(&self, out: W) -> StsResult<()> {
        if let Some((name, column)) = self
            .columns
            .iter()
            .find(|(_, c)| c.len() != self.wavelength.len())
        {
            return Err(StsError::DataIntegrity(format!(
                "column {name} has {} values for {} wavelengths",
                column.len(),
                self.wavelength.len()
            )));
        }
        let mut writer = csv::Writer::from_writer(out);
        writer
            .write_record(
                std::iter::once(WAVELENGTH_COLUMN).chain(self.columns.iter().map(|(n, _)| n.as_str())),
            )
            .map_err(csv_error)?;
        for (i, wavelength) in self.wavelength.iter().enumerate() {
            writer
                .write_record(
                    std::iter::once(wavelength.to_string())
                        .chain(self.columns.iter().map(|(_, c)| c[i].to_string())),
                )
                .map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Write merged insertion loss.
pub fn write_insertion_loss<W: Write>(
    out: W,
    wavelength: &[f64],
    traces: &[InsertionLossTrace],
) -> StsResult<()> {
    Table {
        wavelength,
        columns: traces
            .iter()
            .map(|t| (t.channel.to_string(), t.loss.as_slice()))
            .collect(),
    }
    .write(out)
}

/// Write rescaled reference traces. The wavelength column comes from the
/// first record.
pub fn write_reference<W: Write>(out: W, records: &[ReferenceRecord]) -> StsResult<()> {
    let wavelength = records
        .first()
        .map_or(&[][..], |r| r.rescaled_wavelength.as_slice());
    let mut columns = Vec::with_capacity(records.len() * 2);
    for record in records {
        let channel = record.channel_ref();
        columns.push((format!("{channel}_TSLPower"), record.rescaled_monitor.as_slice()));
        columns.push((
            format!("{channel}_MPMPower"),
            record.rescaled_reference_power.as_slice(),
        ));
    }
    Table { wavelength, columns }.write(out)
}

/// Write rescaled DUT traces, two columns per record.
pub fn write_dut<W: Write>(out: W, records: &[MeasurementRecord]) -> StsResult<()> {
    let wavelength = records
        .first()
        .map_or(&[][..], |r| r.rescaled_wavelength.as_slice());
    let mut columns = Vec::with_capacity(records.len() * 2);
    for record in records {
        let prefix = format!("{}R{}", record.channel_ref(), record.range);
        columns.push((format!("{prefix}_TSLPower"), record.rescaled_dut_monitor.as_slice()));
        columns.push((format!("{prefix}_MPMPower"), record.rescaled_dut_power.as_slice()));
    }
    Table { wavelength, columns }.write(out)
}
