use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use sts_core::config::{StorageConfig, SweepSettings};
use sts_core::{ChannelRef, InsertionLossTrace, ReferenceRecord};
use sts_storage::{ResultStore, ScanParameters};

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(hour, 30, 0)
        .unwrap()
}

fn store(dir: &tempfile::TempDir) -> ResultStore {
    ResultStore::new(&StorageConfig {
        output_dir: dir.path().join("results"),
        archive_dir: "previous".into(),
    })
}

#[test]
fn second_save_archives_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let params = ScanParameters::new(&SweepSettings::default(), 0.01, &[ChannelRef::new(1, 1)], &[1]);

    let first = store.save_params(&params, at(9)).unwrap();
    let second = store.save_params(&params, at(10)).unwrap();
    assert_eq!(first, second);
    assert!(store
        .archive_dir()
        .join("20240601_103000_last_scan_params.json")
        .exists());
    assert_eq!(store.load_params().unwrap(), Some(params));
}

#[test]
fn empty_directory_has_nothing_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    assert!(store.load_params().unwrap().is_none());
    assert!(store.load_reference_cache().unwrap().is_none());
}

#[test]
fn exports_land_in_the_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    let mut reference = ReferenceRecord::shell(0, ChannelRef::new(1, 1));
    reference.log_data = vec![-1.0, -1.1];
    reference.trigger = vec![0.0, 5.0, 0.0, 5.0];
    reference.monitor = vec![2.0; 4];
    reference.rescaled_wavelength = vec![1550.0, 1551.0];
    reference.rescaled_monitor = vec![2.0, 2.0];
    reference.rescaled_reference_power = vec![-1.0, -1.1];
    store.save_reference_cache(&[reference.clone()], at(9)).unwrap();
    assert_eq!(store.load_reference_cache().unwrap(), Some(vec![reference.clone()]));

    let reference_csv = store.export_reference(&[reference], at(9)).unwrap();
    assert_eq!(
        reference_csv.file_name().unwrap(),
        "data_reference_20240601_09hr30m00sec.csv"
    );

    let trace = InsertionLossTrace {
        module: 0,
        channel: ChannelRef::new(1, 1),
        loss: vec![3.0, 3.0],
    };
    let il_csv = store
        .export_insertion_loss(&[1550.0, 1551.0], &[trace], at(9))
        .unwrap();
    let text = fs::read_to_string(il_csv).unwrap();
    assert_eq!(text.lines().next(), Some("Wavelength(nm),Slot1Ch1"));
    assert_eq!(text.lines().count(), 3);

    let dut_csv = store.export_dut(&[], at(9)).unwrap();
    assert_eq!(fs::read_to_string(dut_csv).unwrap(), "Wavelength(nm)\n");
}
