use async_trait::async_trait;
use il_sts::{Console, Session};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use sts_core::config::StorageConfig;
use sts_core::{StsConfig, StsError, StsResult, SweepSettings};
use sts_driver_mock::{FaultConfig, FaultKind, FaultScenario, MockBench};

/// Console answering from a script and remembering the questions.
struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            questions: Mutex::new(Vec::new()),
        })
    }

    fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }

    fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn ask(&self, question: &str) -> StsResult<String> {
        self.questions.lock().unwrap().push(question.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| StsError::Configuration(format!("no scripted answer for '{question}'")))
    }

    fn show(&self, _message: &str) {}
}

fn config(dir: &Path) -> StsConfig {
    StsConfig {
        sweep: SweepSettings {
            start_nm: 1550.0,
            stop_nm: 1551.0,
            step_nm: 0.1,
            speed_nm_per_s: 10.0,
            power_dbm: 0.0,
        },
        storage: StorageConfig {
            output_dir: dir.to_path_buf(),
            archive_dir: "previous".into(),
        },
        ..StsConfig::default()
    }
}

async fn first_session(dir: &Path) -> il_sts::SessionReport {
    let console = ScriptedConsole::new(&[
        "",            // speed from the table default
        "(0,1);(0,2)", // channels
        "1,3",         // ranges
        "",            // reference fibre on Slot0Ch1
        "",            // reference fibre on Slot0Ch2
        "2",           // repeat count
        "n",           // redo
    ]);
    let mock = MockBench::new();
    let dut = mock.clone();
    let report = Session::new(config(dir), console.clone())
        .on_dut_connected(move || dut.set_dut_loss_db(3.0))
        .run(mock.bench())
        .await
        .unwrap();
    assert_eq!(console.remaining(), 0);
    assert_eq!(mock.call_count("tsl.disconnect"), 1);
    report
}

#[tokio::test]
async fn fresh_session_measures_and_saves_everything() {
    let dir = tempfile::tempdir().unwrap();
    let report = first_session(dir.path()).await;

    assert!(!report.parameters_loaded);
    assert!(!report.reference_cached);
    assert_eq!(report.measurements, 8);
    assert_eq!(report.insertion_loss.len(), 2);
    assert!(report
        .insertion_loss
        .iter()
        .all(|t| t.loss.iter().all(|l| (l - 3.0).abs() < 1e-9)));
    assert_eq!(report.files.len(), 5);
    assert!(report.files.iter().all(|f| f.exists()));
    assert!(dir.path().join("last_scan_params.json").exists());
    assert!(dir.path().join("last_scan_reference_data.json").exists());
}

#[tokio::test]
async fn second_session_reuses_parameters_and_reference() {
    let dir = tempfile::tempdir().unwrap();
    first_session(dir.path()).await;

    let console = ScriptedConsole::new(&["y", "y", "1", "n"]);
    let mock = MockBench::new();
    let report = Session::new(config(dir.path()), console.clone())
        .run(mock.bench())
        .await
        .unwrap();

    assert!(report.parameters_loaded);
    assert!(report.reference_cached);
    assert_eq!(report.measurements, 4);
    // Loaded parameters are not written again.
    assert_eq!(report.files.len(), 4);
    assert_eq!(mock.call_count("tsl.start_sweep"), 2);
    assert!(console.questions()[0].starts_with("Load the previous settings"));
    assert_eq!(console.remaining(), 0);
}

#[tokio::test]
async fn invalid_answers_are_asked_again() {
    let dir = tempfile::tempdir().unwrap();
    let console = ScriptedConsole::new(&[
        "7", "", // speed not in the table, then the default
        "(9,9)", "odd", // unknown channel, then odd channels
        "6", "2", // unavailable range, then range 2
        "", "", // reference fibre on Slot0Ch1 and Slot0Ch3
        "zero", "1", // repeat count
        "n",
    ]);
    let mock = MockBench::new();
    let report = Session::new(config(dir.path()), console.clone())
        .run(mock.bench())
        .await
        .unwrap();
    assert_eq!(report.measurements, 2);
    assert_eq!(console.remaining(), 0);
}

#[tokio::test]
async fn failed_session_still_disconnects() {
    let dir = tempfile::tempdir().unwrap();
    // The script ends before the repeat count.
    let console = ScriptedConsole::new(&["", "all", "1", "", "", "", ""]);
    let mock = MockBench::new();
    let err = Session::new(config(dir.path()), console)
        .run(mock.bench())
        .await
        .unwrap_err();
    assert!(matches!(err, StsError::Configuration(_)));
    assert_eq!(mock.call_count("tsl.stop_sweep"), 2);
    assert_eq!(mock.call_count("mpm.disconnect"), 1);
}

#[tokio::test]
async fn recoverable_measurement_failure_offers_a_redo() {
    let dir = tempfile::tempdir().unwrap();
    // The first sampling start belongs to the reference, the second to the DUT.
    let mock = MockBench::with_faults(FaultConfig::scenario(FaultScenario::FailOnCall {
        operation: "spu.start_sampling",
        call: 2,
        kind: FaultKind::Parameter,
    }));
    let console = ScriptedConsole::new(&["", "(0,1)", "1", "", "1", "y", "1", "n"]);
    let report = Session::new(config(dir.path()), console.clone())
        .run(mock.bench())
        .await
        .unwrap();

    assert_eq!(report.measurements, 1);
    assert_eq!(console.remaining(), 0);
    // Reference, the failed scan, the redone scan, shutdown.
    assert_eq!(mock.call_count("tsl.stop_sweep"), 4);
}
