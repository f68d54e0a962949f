use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sts_core::config::SweepSettings;
use sts_core::{
    AcquisitionPlan, ChannelRef, DeviceKind, InstrumentStatus, MergeUnit, MonitorUnit, StsError,
    StsResult, SweepUnit, TimeoutConfig,
};
use sts_driver_mock::{FaultConfig, FaultKind, FaultScenario, MockBench};
use sts_experiment::{
    AutoOperator, CycleState, LinearRescaler, Operator, RescaledPair, RescalingMode,
    RescalingService, SweepOrchestrator,
};
use sts_storage::reference_cache;

fn settings() -> SweepSettings {
    SweepSettings {
        start_nm: 1550.0,
        stop_nm: 1551.0,
        step_nm: 0.1,
        speed_nm_per_s: 10.0,
        power_dbm: 0.0,
    }
}

async fn ready(
    mock: &MockBench,
    rescaler: Box<dyn RescalingService>,
    channels: &[ChannelRef],
    ranges: &[u8],
) -> SweepOrchestrator {
    let bench = mock.bench();
    bench.connect_all().await.unwrap();
    let mut orchestrator = SweepOrchestrator::new(bench, rescaler, TimeoutConfig::default());
    orchestrator.configure_laser(settings()).await.unwrap();
    orchestrator.configure_acquisition().await.unwrap();
    orchestrator
        .set_plan(AcquisitionPlan::build(channels, ranges).unwrap())
        .unwrap();
    mock.clear_calls();
    orchestrator
}

async fn linear(mock: &MockBench, channels: &[ChannelRef], ranges: &[u8]) -> SweepOrchestrator {
    ready(mock, Box::new(LinearRescaler::new()), channels, ranges).await
}

const CH1: ChannelRef = ChannelRef::new(0, 1);
const CH2: ChannelRef = ChannelRef::new(0, 2);

#[tokio::test]
async fn reference_then_measurement_recovers_dut_loss() {
    let mock = MockBench::new();
    let mut orchestrator = linear(&mock, &[CH1, CH2], &[1, 3]).await;

    orchestrator.run_reference(&AutoOperator).await.unwrap();
    assert_eq!(orchestrator.references().len(), 2);
    assert!(orchestrator.references().iter().all(|r| r.has_raw_data() && r.is_rescaled()));
    assert_eq!(orchestrator.references()[0].rescaled_wavelength.len(), 11);

    mock.set_dut_loss_db(3.0);
    let added = orchestrator.run_measurement().await.unwrap();
    assert_eq!(added, 4);
    assert_eq!(orchestrator.wavelength_table().len(), 11);

    let traces = orchestrator.insertion_loss();
    assert_eq!(traces.len(), 2);
    assert_eq!(traces[0].channel, CH1);
    for trace in traces {
        assert_eq!(trace.loss.len(), 11);
        assert!(trace.loss.iter().all(|l| (l - 3.0).abs() < 1e-9), "{:?}", trace.loss);
    }

    // One sweep per reference channel, one per measurement range.
    assert_eq!(mock.call_count("tsl.start_sweep"), 4);
    assert_eq!(mock.call_count("tsl.stop_sweep"), 3);
    assert_eq!(mock.call_count("mpm.stop_logging"), 4);
    let ranges: Vec<String> = mock
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("mpm.set_range"))
        .collect();
    assert_eq!(
        ranges,
        vec!["mpm.set_range 1", "mpm.set_range 1", "mpm.set_range 1", "mpm.set_range 3"]
    );
    assert_eq!(orchestrator.state(), CycleState::Standby);
}

#[tokio::test]
async fn logging_start_failure_aborts_without_stops() {
    let mock = MockBench::with_faults(FaultConfig::scenario(FaultScenario::FailOnCall {
        operation: "mpm.start_logging",
        call: 1,
        kind: FaultKind::Device(InstrumentStatus::Failure),
    }));
    let mut orchestrator = linear(&mock, &[CH1], &[1]).await;

    let err = orchestrator.run_reference(&AutoOperator).await.unwrap_err();
    assert!(matches!(err, StsError::Device { .. }));
    assert_eq!(err.device_kind(), Some(DeviceKind::Mpm));
    assert_eq!(orchestrator.state(), CycleState::Aborting);
    assert_eq!(mock.call_count("tsl.stop_sweep"), 0);
    assert_eq!(mock.call_count("mpm.stop_logging"), 0);
    assert!(orchestrator.references().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_cycles_stop_logging_exactly_once() {
    let cases = [
        (FaultScenario::SweepNeverArms, Some(DeviceKind::Tsl)),
        (FaultScenario::SweepNeverReturns, Some(DeviceKind::Tsl)),
        (FaultScenario::SamplingStalls, Some(DeviceKind::Spu)),
        (FaultScenario::NoTrigger, None),
    ];
    for (scenario, device) in cases {
        let mock = MockBench::with_faults(FaultConfig::scenario(scenario.clone()));
        let mut orchestrator = linear(&mock, &[CH1], &[1]).await;

        let err = orchestrator.run_cycle().await.unwrap_err();
        match device {
            Some(kind) => {
                assert!(err.is_synchronization_timeout(), "{scenario:?}: {err}");
                assert_eq!(err.device_kind(), Some(kind), "{scenario:?}");
            }
            None => assert!(matches!(err, StsError::TriggerCable), "{scenario:?}: {err}"),
        }
        assert_eq!(mock.call_count("mpm.stop_logging"), 1, "{scenario:?}");
        assert_eq!(mock.call_count("tsl.stop_sweep"), 0, "{scenario:?}");
        assert_eq!(orchestrator.state(), CycleState::Aborting);
    }
}

#[tokio::test]
async fn measurements_accumulate_until_cleared() {
    let mock = MockBench::new();
    let mut orchestrator = linear(&mock, &[CH1], &[1, 2]).await;
    orchestrator.run_reference(&AutoOperator).await.unwrap();

    assert_eq!(orchestrator.run_measurement().await.unwrap(), 2);
    assert_eq!(orchestrator.run_measurement().await.unwrap(), 2);
    assert_eq!(orchestrator.measurements().len(), 4);
    let ranges: Vec<u8> = orchestrator.measurements().iter().map(|m| m.range).collect();
    assert_eq!(ranges, vec![1, 2, 1, 2]);

    orchestrator.clear_measurements().unwrap();
    assert!(orchestrator.measurements().is_empty());
    assert!(orchestrator.insertion_loss().is_empty());
}

#[tokio::test]
async fn measurement_requires_reference() {
    let mock = MockBench::new();
    let mut orchestrator = linear(&mock, &[CH1], &[1]).await;
    assert!(matches!(
        orchestrator.run_measurement().await,
        Err(StsError::Configuration(_))
    ));
    assert_eq!(mock.call_count("tsl.start_sweep"), 0);
}

#[tokio::test]
async fn partial_reference_is_discarded() {
    let mock = MockBench::with_faults(FaultConfig::scenario(FaultScenario::FailOnCall {
        operation: "tsl.start_sweep",
        call: 2,
        kind: FaultKind::Device(InstrumentStatus::DeviceError),
    }));
    let mut orchestrator = linear(&mock, &[CH1, CH2], &[1]).await;

    assert!(orchestrator.run_reference(&AutoOperator).await.is_err());
    assert!(orchestrator.references().is_empty());
    assert!(matches!(
        orchestrator.run_measurement().await,
        Err(StsError::Configuration(_))
    ));
}

struct DecliningOperator;

#[async_trait]
impl Operator for DecliningOperator {
    async fn confirm_reference_connection(&self, _channel: ChannelRef) -> StsResult<()> {
        Err(StsError::Configuration("operator cancelled".into()))
    }
}

#[tokio::test]
async fn declined_prompt_starts_no_sweep() {
    let mock = MockBench::new();
    let mut orchestrator = linear(&mock, &[CH1], &[1]).await;
    assert!(orchestrator.run_reference(&DecliningOperator).await.is_err());
    assert_eq!(mock.call_count("tsl.start_sweep"), 0);
}

#[tokio::test]
async fn cached_reference_matches_live_capture() {
    let live_mock = MockBench::new();
    let mut live = linear(&live_mock, &[CH1, CH2], &[1]).await;
    live.run_reference(&AutoOperator).await.unwrap();

    let cached_mock = MockBench::new();
    let mut cached = linear(&cached_mock, &[CH1, CH2], &[1]).await;
    cached.run_reference_from_cache(live.references()).unwrap();

    assert_eq!(cached.references(), live.references());
    assert_eq!(cached_mock.call_count("tsl.start_sweep"), 0);

    // Cached order does not matter.
    let reversed: Vec<_> = live.references().iter().rev().cloned().collect();
    cached.run_reference_from_cache(&reversed).unwrap();
    assert_eq!(cached.references(), live.references());

    cached_mock.set_dut_loss_db(1.5);
    cached.run_measurement().await.unwrap();
    assert!(cached.insertion_loss()[1].loss.iter().all(|l| (l - 1.5).abs() < 1e-9));
}

#[tokio::test]
async fn reference_reloaded_from_disk_matches_live_capture() {
    let live_mock = MockBench::new();
    let mut live = linear(&live_mock, &[CH1, CH2], &[1, 3]).await;
    live.run_reference(&AutoOperator).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(reference_cache::REFERENCE_CACHE_FILE);
    reference_cache::save(&path, live.references()).unwrap();
    let reloaded = reference_cache::load(&path).unwrap().unwrap();

    let cached_mock = MockBench::new();
    let mut cached = linear(&cached_mock, &[CH1, CH2], &[1, 3]).await;
    cached.run_reference_from_cache(&reloaded).unwrap();

    // Bit for bit, not approximately.
    for (c, l) in cached.references().iter().zip(live.references()) {
        for (a, b) in [
            (&c.log_data, &l.log_data),
            (&c.monitor, &l.monitor),
            (&c.rescaled_monitor, &l.rescaled_monitor),
            (&c.rescaled_reference_power, &l.rescaled_reference_power),
        ] {
            let a: Vec<u64> = a.iter().map(|v| v.to_bits()).collect();
            let b: Vec<u64> = b.iter().map(|v| v.to_bits()).collect();
            assert_eq!(a, b);
        }
    }
    assert_eq!(cached.references(), live.references());
}

#[tokio::test]
async fn reselected_ranges_drop_earlier_captures() {
    let mock = MockBench::new();
    let mut orchestrator = linear(&mock, &[CH1], &[1, 2]).await;
    orchestrator.run_reference(&AutoOperator).await.unwrap();
    mock.set_dut_loss_db(3.0);
    orchestrator.run_measurement().await.unwrap();

    orchestrator
        .set_plan(AcquisitionPlan::build(&[CH1], &[3]).unwrap())
        .unwrap();
    orchestrator.run_reference(&AutoOperator).await.unwrap();
    mock.set_dut_loss_db(6.0);
    orchestrator.run_measurement().await.unwrap();

    // Records accumulate; the merge only sees range 3.
    assert_eq!(orchestrator.measurements().len(), 3);
    let trace = &orchestrator.insertion_loss()[0];
    assert!(trace.loss.iter().all(|l| (l - 6.0).abs() < 1e-9), "{:?}", trace.loss);
}

/// Delegates to a [`LinearRescaler`] and counts every call.
struct CountingRescaler {
    inner: LinearRescaler,
    calls: Arc<AtomicUsize>,
}

impl CountingRescaler {
    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl RescalingService for CountingRescaler {
    fn clear_reference(&mut self) -> StsResult<()> {
        self.tick();
        self.inner.clear_reference()
    }
    fn clear_measurement(&mut self) -> StsResult<()> {
        self.tick();
        self.inner.clear_measurement()
    }
    fn make_sweep_wavelength_table(&mut self, start: f64, stop: f64, step: f64) -> StsResult<()> {
        self.tick();
        self.inner.make_sweep_wavelength_table(start, stop, step)
    }
    fn make_target_wavelength_table(&mut self, start: f64, stop: f64, step: f64) -> StsResult<()> {
        self.tick();
        self.inner.make_target_wavelength_table(start, stop, step)
    }
    fn set_rescaling_mode(&mut self, mode: RescalingMode, avg: f64, averaging: bool) -> StsResult<()> {
        self.tick();
        self.inner.set_rescaling_mode(mode, avg, averaging)
    }
    fn add_reference_channel_data(&mut self, log: &[f64], unit: &SweepUnit) -> StsResult<()> {
        self.tick();
        self.inner.add_reference_channel_data(log, unit)
    }
    fn add_reference_monitor_data(&mut self, t: &[f64], m: &[f64], unit: &MonitorUnit) -> StsResult<()> {
        self.tick();
        self.inner.add_reference_monitor_data(t, m, unit)
    }
    fn rescale_reference(&mut self) -> StsResult<()> {
        self.tick();
        self.inner.rescale_reference()
    }
    fn add_measurement_channel_data(&mut self, log: &[f64], unit: &SweepUnit) -> StsResult<()> {
        self.tick();
        self.inner.add_measurement_channel_data(log, unit)
    }
    fn add_measurement_monitor_data(&mut self, t: &[f64], m: &[f64], unit: &MonitorUnit) -> StsResult<()> {
        self.tick();
        self.inner.add_measurement_monitor_data(t, m, unit)
    }
    fn rescale_measurement(&mut self) -> StsResult<()> {
        self.tick();
        self.inner.rescale_measurement()
    }
    fn merge_ranges(&mut self, unit: &MergeUnit) -> StsResult<Vec<f64>> {
        self.tick();
        self.inner.merge_ranges(unit)
    }
    fn target_wavelength_table(&self) -> StsResult<Vec<f64>> {
        self.tick();
        self.inner.target_wavelength_table()
    }
    fn reference_data(&self, unit: &SweepUnit) -> StsResult<RescaledPair> {
        self.tick();
        self.inner.reference_data(unit)
    }
    fn measurement_data(&self, unit: &SweepUnit) -> StsResult<RescaledPair> {
        self.tick();
        self.inner.measurement_data(unit)
    }
}

#[tokio::test]
async fn mismatched_cache_never_reaches_the_rescaler() {
    let live_mock = MockBench::new();
    let mut live = linear(&live_mock, &[CH1, CH2], &[1]).await;
    live.run_reference(&AutoOperator).await.unwrap();
    let good = live.references().to_vec();

    let calls = Arc::new(AtomicUsize::new(0));
    let mock = MockBench::new();
    let mut orchestrator = ready(
        &mock,
        Box::new(CountingRescaler {
            inner: LinearRescaler::new(),
            calls: calls.clone(),
        }),
        &[CH1, CH2],
        &[1],
    )
    .await;
    orchestrator.run_reference_from_cache(&good).unwrap();
    let before = calls.load(Ordering::SeqCst);

    let mut foreign = good.clone();
    foreign[1].channel = 4;
    let mut stripped = good.clone();
    stripped[0].trigger.clear();
    let duplicated = vec![good[0].clone(), good[0].clone()];
    let bad_caches = [good[..1].to_vec(), foreign, stripped, duplicated];

    for cache in bad_caches {
        assert!(matches!(
            orchestrator.run_reference_from_cache(&cache),
            Err(StsError::MismatchedCache(_))
        ));
    }
    assert_eq!(calls.load(Ordering::SeqCst), before);
    assert_eq!(orchestrator.references(), good.as_slice());
}
