//! Reference records of the last scan, raw arrays included.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use sts_core::{ReferenceRecord, StsResult};

/// File name of the reference cache.
pub const REFERENCE_CACHE_FILE: &str = "last_scan_reference_data.json";

/// Read cached records. `None` when the file does not exist.
pub fn load(path: &Path) -> StsResult<Option<Vec<ReferenceRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    let records: Vec<ReferenceRecord> = serde_json::from_reader(reader)?;
    tracing::debug!(records = records.len(), path = %path.display(), "Reference cache read");
    Ok(Some(records))
}

/// Write records as a JSON array.
pub fn save(path: &Path, records: &[ReferenceRecord]) -> StsResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sts_core::ChannelRef;

    #[test]
    fn records_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REFERENCE_CACHE_FILE);
        let mut record = ReferenceRecord::shell(0, ChannelRef::new(1, 2));
        record.log_data = vec![-3.25, -3.5];
        record.trigger = vec![0.0, 5.0, 0.0, 5.0];
        record.monitor = vec![2.0; 4];

        save(&path, &[record.clone()]).unwrap();
        assert_eq!(load(&path).unwrap(), Some(vec![record]));
    }

    #[test]
    fn raw_arrays_reload_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REFERENCE_CACHE_FILE);
        let mut record = ReferenceRecord::shell(0, ChannelRef::new(0, 1));
        // Values whose shortest decimal form needs all 17 digits.
        record.log_data = (0_u32..5000)
            .map(|i| -60.0 * f64::from((i * 7919) % 5000) / 5000.0 - 1e-7 / 3.0)
            .collect();
        record.monitor = (0_u32..5000).map(|i| 1.0 + f64::from(i) * 1e-7 / 3.0).collect();
        record.trigger = vec![0.0, 5.0];

        save(&path, &[record.clone()]).unwrap();
        let loaded = load(&path).unwrap().unwrap().remove(0);
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&loaded.log_data), bits(&record.log_data));
        assert_eq!(bits(&loaded.monitor), bits(&record.monitor));
    }

    #[test]
    fn reads_records_without_rescaled_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REFERENCE_CACHE_FILE);
        std::fs::write(
            &path,
            r#"[{"MPMNumber":0,"SlotNumber":1,"ChannelNumber":1,"log_data":[1.0],"trigger":[0.0],"monitor":[2.0]}]"#,
        )
        .unwrap();
        let records = load(&path).unwrap().unwrap();
        assert!(records[0].has_raw_data());
        assert!(!records[0].is_rescaled());
    }
}
