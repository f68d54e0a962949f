//! One interactive test session, from connecting the bench to saving results.
//!
//! 1. connect laser, power meter and sampler
//! 2. offer the previous parameter record
//! 3. configure the laser sweep
//! 4. select channels and ranges (or take them from the record)
//! 5. configure logging, sampling and rescaling
//! 6. reuse the cached reference (record loaded only) or measure it
//! 7. measure the DUT as often as asked, redo on request or after a
//!    recoverable failure
//! 8. save parameters, CSV results and the reference cache
//! 9. stop the laser and disconnect

use crate::console::{Console, ConsoleOperator};
use std::path::PathBuf;
use std::sync::Arc;
use sts_core::selection::{parse_channel_list, parse_range_list, select_channels, select_ranges};
use sts_core::{
    AcquisitionPlan, ChannelRef, ChannelSelection, InsertionLossTrace, RangeSelection, StsConfig,
    StsError, StsResult, SweepSettings,
};
use sts_experiment::{LinearRescaler, SweepOrchestrator};
use sts_hardware::Bench;
use sts_storage::{ResultStore, ScanParameters};
use tracing::{info, instrument, warn};

/// Called when the operator has connected the DUT, before measuring.
pub type DutHook = Box<dyn Fn() + Send + Sync>;

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Measurement records taken, all repeats included.
    pub measurements: usize,
    /// Insertion loss of the last measurement.
    pub insertion_loss: Vec<InsertionLossTrace>,
    /// Files written.
    pub files: Vec<PathBuf>,
    /// True when sweep and selection came from the previous record.
    pub parameters_loaded: bool,
    /// True when the reference came from the cache.
    pub reference_cached: bool,
}

/// An interactive session.
pub struct Session {
    config: StsConfig,
    console: Arc<dyn Console>,
    store: ResultStore,
    on_dut_connected: Option<DutHook>,
}

/// Sweep and selection the session runs with.
struct Setup {
    sweep: SweepSettings,
    channels: Vec<ChannelRef>,
    ranges: Vec<u8>,
    loaded: bool,
}

/// Channel answer: `a`ll, `e`ven, `o`dd, or a list of `(slot, channel)`.
pub fn parse_channel_answer(answer: &str) -> StsResult<ChannelSelection> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "a" | "all" => Ok(ChannelSelection::All),
        "e" | "even" => Ok(ChannelSelection::Even),
        "o" | "odd" => Ok(ChannelSelection::Odd),
        _ => Ok(ChannelSelection::Explicit(parse_channel_list(answer)?)),
    }
}

/// Range answer: `a`ll or a list of range numbers.
pub fn parse_range_answer(answer: &str) -> StsResult<RangeSelection> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "a" | "all" => Ok(RangeSelection::All),
        _ => Ok(RangeSelection::Explicit(parse_range_list(answer)?)),
    }
}

/// Repeat count: a positive whole number.
pub fn parse_repeat_count(answer: &str) -> Option<u32> {
    answer.trim().parse().ok().filter(|n| *n > 0)
}

impl Session {
    /// Session storing results as configured.
    pub fn new(config: StsConfig, console: Arc<dyn Console>) -> Self {
        let store = ResultStore::new(&config.storage);
        Self {
            config,
            console,
            store,
            on_dut_connected: None,
        }
    }

    /// Run `hook` each time the operator confirms the DUT is connected.
    pub fn on_dut_connected(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_dut_connected = Some(Box::new(hook));
        self
    }

    /// Run the session on `bench`.
    ///
    /// Once connected, the laser is stopped and every device disconnected
    /// whether or not the session succeeds.
    #[instrument(skip_all, err)]
    pub async fn run(&self, bench: Bench) -> StsResult<SessionReport> {
        bench.connect_all().await?;
        let mut orchestrator = SweepOrchestrator::new(
            bench,
            Box::new(LinearRescaler::new()),
            self.config.timeouts,
        );
        let result = self.acquire(&mut orchestrator).await;
        if let Err(e) = orchestrator.shutdown().await {
            warn!(error = %e, "Shutdown incomplete");
        }
        result
    }

    async fn acquire(&self, orchestrator: &mut SweepOrchestrator) -> StsResult<SessionReport> {
        let setup = self.setup(orchestrator).await?;
        let actual_step_nm = orchestrator.configure_laser(setup.sweep).await?;
        orchestrator.set_plan(AcquisitionPlan::build(&setup.channels, &setup.ranges)?)?;
        orchestrator.configure_acquisition().await?;

        let reference_cached = self.reference(orchestrator, setup.loaded).await?;
        self.measure(orchestrator).await?;

        let params = ScanParameters::new(&setup.sweep, actual_step_nm, &setup.channels, &setup.ranges);
        let files = self.save(orchestrator, (!setup.loaded).then_some(&params))?;
        Ok(SessionReport {
            measurements: orchestrator.measurements().len(),
            insertion_loss: orchestrator.insertion_loss().to_vec(),
            files,
            parameters_loaded: setup.loaded,
            reference_cached,
        })
    }

    async fn setup(&self, orchestrator: &SweepOrchestrator) -> StsResult<Setup> {
        if let Some(params) = self.store.load_params()? {
            let question = format!(
                "Load the previous settings from {}?",
                self.store.params_path().display()
            );
            if self.console.confirm(&question).await? {
                info!("Using previous parameters");
                return Ok(Setup {
                    sweep: params.sweep_settings(),
                    channels: params.channels,
                    ranges: params.ranges,
                    loaded: true,
                });
            }
        }

        let tsl = &orchestrator.bench().tsl;
        let mut sweep = self.config.sweep;
        if tsl.supports_sweep_speed_table() {
            let table = tsl.sweep_speed_table().await?;
            sweep.speed_nm_per_s = self.choose_speed(&table, sweep.speed_nm_per_s).await?;
        }

        let mpm = &orchestrator.bench().mpm;
        let matrix = mpm.channel_matrix().await?;
        let available = mpm.available_ranges().await?;
        let channels = loop {
            let answer = self
                .console
                .ask("Channels: [a]ll, [e]ven, [o]dd, or a list such as (1,1);(1,2)")
                .await?;
            match parse_channel_answer(&answer).and_then(|mode| select_channels(&matrix, &mode)) {
                Ok(channels) if !channels.is_empty() => break channels,
                Ok(_) => self.console.show("No channel matches that selection."),
                Err(e) => self.console.show(&e.to_string()),
            }
        };
        let ranges = loop {
            let answer = self
                .console
                .ask(&format!("Ranges {available:?}: [a]ll or a list such as 1,3"))
                .await?;
            match parse_range_answer(&answer).and_then(|mode| select_ranges(&available, &mode)) {
                Ok(ranges) if !ranges.is_empty() => break ranges,
                Ok(_) => self.console.show("No range matches that selection."),
                Err(e) => self.console.show(&e.to_string()),
            }
        };
        Ok(Setup {
            sweep,
            channels,
            ranges,
            loaded: false,
        })
    }

    async fn choose_speed(&self, table: &[f64], default: f64) -> StsResult<f64> {
        let in_table = |speed: f64| table.iter().any(|s| (s - speed).abs() < 1e-9);
        loop {
            let answer = self
                .console
                .ask(&format!("Sweep speed in nm/s {table:?} (ENTER for {default})"))
                .await?;
            let speed = if answer.trim().is_empty() {
                Some(default)
            } else {
                answer.trim().parse().ok()
            };
            match speed {
                Some(speed) if in_table(speed) => return Ok(speed),
                _ => self.console.show("Pick a speed from the table."),
            }
        }
    }

    /// Returns true when the cached reference was used.
    async fn reference(&self, orchestrator: &mut SweepOrchestrator, loaded: bool) -> StsResult<bool> {
        if loaded {
            if let Some(cached) = self.store.load_reference_cache()? {
                if self.console.confirm("Use the previous reference data?").await? {
                    match orchestrator.run_reference_from_cache(&cached) {
                        Ok(()) => {
                            self.console.show("Reference loaded from cache.");
                            return Ok(true);
                        }
                        Err(e @ StsError::MismatchedCache(_)) => {
                            warn!(error = %e, "Cached reference unusable, measuring it again");
                            self.console.show(&format!("{e}; measuring the reference again."));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        self.console.show("Reference measurement");
        let operator = ConsoleOperator::new(self.console.clone());
        orchestrator.run_reference(&operator).await?;
        Ok(false)
    }

    async fn measure(&self, orchestrator: &mut SweepOrchestrator) -> StsResult<()> {
        loop {
            let repeats = loop {
                let answer = self
                    .console
                    .ask("Connect the DUT and enter the repeat count")
                    .await?;
                match parse_repeat_count(&answer) {
                    Some(n) => break n,
                    None => self.console.show("Enter a positive whole number."),
                }
            };
            if let Some(hook) = &self.on_dut_connected {
                hook();
            }
            if let Err(e) = self.scan(orchestrator, repeats).await {
                if !e.is_recoverable() {
                    return Err(e);
                }
                // A failed cycle leaves the laser sweeping.
                if let Err(stop) = orchestrator.bench().tsl.stop_sweep().await {
                    warn!(error = %stop, "Best-effort laser stop failed");
                }
                warn!(error = %e, "Measurement failed");
                self.console.show(&format!("Measurement failed: {e}"));
            }
            if !self.console.confirm("Redo scan?").await? {
                return Ok(());
            }
        }
    }

    async fn scan(&self, orchestrator: &mut SweepOrchestrator, repeats: u32) -> StsResult<()> {
        for scan in 1..=repeats {
            self.console.show(&format!("Scan {scan} of {repeats}"));
            orchestrator.run_measurement().await?;
            for trace in orchestrator.insertion_loss() {
                let mean = trace.loss.iter().sum::<f64>() / trace.loss.len().max(1) as f64;
                self.console
                    .show(&format!("  {}: mean IL {mean:.3} dB", trace.channel));
            }
        }
        Ok(())
    }

    fn save(
        &self,
        orchestrator: &SweepOrchestrator,
        params: Option<&ScanParameters>,
    ) -> StsResult<Vec<PathBuf>> {
        let now = chrono::Local::now().naive_local();
        let mut files = Vec::with_capacity(5);
        if let Some(params) = params {
            files.push(self.store.save_params(params, now)?);
        }
        files.push(self.store.export_insertion_loss(
            orchestrator.wavelength_table(),
            orchestrator.insertion_loss(),
            now,
        )?);
        files.push(self.store.export_reference(orchestrator.references(), now)?);
        files.push(self.store.export_dut(orchestrator.measurements(), now)?);
        files.push(
            self.store
                .save_reference_cache(orchestrator.references(), now)?,
        );
        for file in &files {
            self.console.show(&format!("Saved {}", file.display()));
        }
        Ok(files)
    }
}
