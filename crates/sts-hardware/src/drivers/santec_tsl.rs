//! Santec TSL tunable laser driver.
//!
//! Protocol overview:
//! - SCPI over LAN (CR terminated), USB serial or GPIB
//! - `:WAV:SWE?` reports 0 = stopped, 1 = sweeping, 2 = waiting for trigger,
//!   3 = preparing / returning, 4 = paused
//! - `*OPC?` answers 0 while a command is still executing
//! - `:SYST:ERR?` answers `code,"message"`; code 0 means no error
//!
//! TSL-510/550/710 are only supported over GPIB and have no sweep speed
//! table; any other model has one.

use crate::capabilities::{LaserInfo, SweepLaser, SweepStatus};
use crate::scpi::ScpiLink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sts_core::config::{SweepSettings, TimeoutConfig};
use sts_core::device::{tsl_model_is_gpib_only, MAX_TSL_POWER_DBM};
use sts_core::{DeviceKind, Interface, InstrumentStatus, StsError, StsResult};
use tokio::sync::Mutex;
use tracing::instrument;

/// Driver for Santec TSL-5xx/7xx lasers.
pub struct SantecTsl {
    link: Arc<ScpiLink>,
    interface: Interface,
    busy_timeout: Duration,
    poll_interval: Duration,
    info: Mutex<Option<LaserInfo>>,
    has_speed_table: AtomicBool,
}

impl SantecTsl {
    /// Create a driver on an opened link.
    pub fn new(link: Arc<ScpiLink>, interface: Interface, timeouts: &TimeoutConfig) -> Self {
        Self {
            link,
            interface,
            busy_timeout: timeouts.busy(),
            poll_interval: timeouts.poll_interval(),
            info: Mutex::new(None),
            has_speed_table: AtomicBool::new(false),
        }
    }

    /// Information read at connect time.
    pub async fn info(&self) -> Option<LaserInfo> {
        self.info.lock().await.clone()
    }

    /// Read the error queue; a non-zero code is raised as `kind`.
    async fn check_error(&self, context: &str, parameter: bool) -> StsResult<()> {
        let response = self.link.query(":SYST:ERR?").await?;
        let (code, message) = response.split_once(',').unwrap_or((response.as_str(), ""));
        let code: i32 = code.trim().parse().unwrap_or(-1);
        if code == 0 {
            return Ok(());
        }
        let message = format!("{context}: {code},{}", message.trim().trim_matches('"'));
        if parameter {
            Err(StsError::parameter(DeviceKind::Tsl, message))
        } else {
            Err(StsError::device(
                DeviceKind::Tsl,
                InstrumentStatus::DeviceError,
                message,
            ))
        }
    }

    async fn spec_range(&self) -> Option<(f64, f64)> {
        self.info
            .lock()
            .await
            .as_ref()
            .map(|i| (i.min_wavelength_nm, i.max_wavelength_nm))
    }
}

/// Split a `*IDN?` answer into model and serial number.
fn parse_identity(idn: &str) -> Option<(String, String)> {
    let mut fields = idn.split(',').map(str::trim);
    let vendor = fields.next()?;
    if !vendor.to_ascii_uppercase().contains("SANTEC") {
        return None;
    }
    let model = fields.next()?.to_string();
    let serial = fields.next().unwrap_or_default().to_string();
    Some((model, serial))
}

fn parse_sweep_status(raw: i64) -> Option<SweepStatus> {
    match raw {
        0 => Some(SweepStatus::Standby),
        1 => Some(SweepStatus::Running),
        2 => Some(SweepStatus::WaitingForTrigger),
        3 => Some(SweepStatus::Returning),
        4 => Some(SweepStatus::Pausing),
        _ => None,
    }
}

#[async_trait]
impl SweepLaser for SantecTsl {
    #[instrument(skip(self), err)]
    async fn connect(&self) -> StsResult<LaserInfo> {
        let idn = self
            .link
            .query("*IDN?")
            .await
            .map_err(|e| StsError::connection(DeviceKind::Tsl, e.to_string()))?;
        let (model, serial) = parse_identity(&idn).ok_or_else(|| {
            StsError::connection(DeviceKind::Tsl, format!("unexpected identity '{idn}'"))
        })?;

        if tsl_model_is_gpib_only(&model) && self.interface != Interface::Gpib {
            return Err(StsError::connection(
                DeviceKind::Tsl,
                format!("{model} is supported via GPIB only"),
            ));
        }

        let min_wavelength_nm = self.link.query_f64(":WAV:MIN?").await?;
        let max_wavelength_nm = self.link.query_f64(":WAV:MAX?").await?;

        if self.link.query_i64(":POW:STAT?").await? != 1 {
            tracing::info!("TSL laser diode is off, switching on");
            self.link.write(":POW:STAT 1").await?;
            self.wait_until_idle(self.busy_timeout).await?;
        }

        let info = LaserInfo {
            model,
            serial,
            min_wavelength_nm,
            max_wavelength_nm,
        };
        self.has_speed_table
            .store(!tsl_model_is_gpib_only(&info.model), Ordering::Relaxed);
        tracing::info!(
            model = %info.model,
            min_nm = info.min_wavelength_nm,
            max_nm = info.max_wavelength_nm,
            "TSL connected"
        );
        *self.info.lock().await = Some(info.clone());
        Ok(info)
    }

    async fn disconnect(&self) -> StsResult<()> {
        *self.info.lock().await = None;
        tracing::info!("TSL disconnected");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_power(&self, dbm: f64) -> StsResult<()> {
        if dbm > MAX_TSL_POWER_DBM {
            return Err(StsError::parameter(
                DeviceKind::Tsl,
                format!("output power {dbm} dBm exceeds {MAX_TSL_POWER_DBM} dBm"),
            ));
        }
        self.link.write(":POW:UNIT 0").await?;
        self.link.write(&format!(":POW {dbm:.2}")).await?;
        self.check_error("set power", true).await?;
        self.wait_until_idle(self.busy_timeout).await
    }

    #[instrument(skip(self), err)]
    async fn set_sweep_parameters(&self, sweep: &SweepSettings) -> StsResult<f64> {
        sweep
            .validate()
            .map_err(|e| StsError::parameter(DeviceKind::Tsl, e.to_string()))?;
        if let Some((min, max)) = self.spec_range().await {
            if sweep.start_nm < min || sweep.stop_nm > max {
                return Err(StsError::parameter(
                    DeviceKind::Tsl,
                    format!(
                        "sweep {}-{} nm outside laser range {min}-{max} nm",
                        sweep.start_nm, sweep.stop_nm
                    ),
                ));
            }
        }

        self.wait_until_idle(self.busy_timeout).await?;
        for command in [
            ":WAV:SWE:MOD 1".to_string(),
            format!(":WAV:SWE:STAR {:.4}", sweep.start_nm),
            format!(":WAV:SWE:STOP {:.4}", sweep.stop_nm),
            format!(":WAV:SWE:SPE {:.3}", sweep.speed_nm_per_s),
            ":WAV:SWE:CYCL 1".to_string(),
            ":TRIG:OUTP 2".to_string(),
            format!(":TRIG:OUTP:STEP {:.4}", sweep.step_nm),
            ":TRIG:INP:STAN 1".to_string(),
        ] {
            self.link.write(&command).await?;
        }
        self.check_error("set sweep parameters", true).await?;

        let actual_step = self.link.query_f64(":TRIG:OUTP:STEP?").await?;
        self.wait_until_idle(self.busy_timeout).await?;
        tracing::info!(actual_step, "TSL sweep parameters set");
        Ok(actual_step)
    }

    #[instrument(skip(self), err)]
    async fn start_sweep(&self) -> StsResult<()> {
        self.link.write(":WAV:SWE 1").await?;
        self.check_error("start sweep", false).await
    }

    async fn stop_sweep(&self) -> StsResult<()> {
        // Stopping a stopped sweep is accepted by the instrument.
        self.link.write(":WAV:SWE 0").await?;
        tracing::debug!("TSL sweep stopped");
        Ok(())
    }

    async fn software_trigger(&self) -> StsResult<()> {
        self.link.write(":WAV:SWE:SOFT").await?;
        self.check_error("software trigger", false).await
    }

    async fn sweep_status(&self) -> StsResult<SweepStatus> {
        let raw = self.link.query_i64(":WAV:SWE?").await?;
        parse_sweep_status(raw).ok_or_else(|| {
            StsError::device(
                DeviceKind::Tsl,
                InstrumentStatus::DeviceError,
                format!("unknown sweep status {raw}"),
            )
        })
    }

    async fn is_busy(&self) -> StsResult<bool> {
        Ok(self.link.query_i64("*OPC?").await? == 0)
    }

    fn supports_sweep_speed_table(&self) -> bool {
        self.has_speed_table.load(Ordering::Relaxed)
    }

    async fn sweep_speed_table(&self) -> StsResult<Vec<f64>> {
        if !self.supports_sweep_speed_table() {
            return Ok(Vec::new());
        }
        self.link.query_list(":WAV:SWE:SPE:TABL?").await
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::test_support::scripted_device;

    fn responder(command: &str) -> Option<String> {
        match command {
            "*IDN?" => Some("SANTEC,TSL-570,21040001,0001.0001".into()),
            ":WAV:MIN?" => Some("1480.000".into()),
            ":WAV:MAX?" => Some("1640.000".into()),
            ":POW:STAT?" => Some("1".into()),
            "*OPC?" => Some("1".into()),
            ":SYST:ERR?" => Some("0,\"No error\"".into()),
            ":TRIG:OUTP:STEP?" => Some("0.0010".into()),
            ":WAV:SWE?" => Some("2".into()),
            ":WAV:SWE:SPE:TABL?" => Some("1,2,5,10,20,50,100,200".into()),
            _ => None,
        }
    }

    fn driver(interface: Interface) -> (SantecTsl, tokio::task::JoinHandle<Vec<String>>) {
        let (link, log) = scripted_device(DeviceKind::Tsl, responder);
        (
            SantecTsl::new(Arc::new(link), interface, &TimeoutConfig::default()),
            log,
        )
    }

    #[tokio::test]
    async fn connect_reads_identity_and_range() {
        let (tsl, _log) = driver(Interface::Lan);
        let info = tsl.connect().await.unwrap();
        assert_eq!(info.model, "TSL-570");
        assert_eq!(info.max_wavelength_nm, 1640.0);
        assert!(tsl.supports_sweep_speed_table());
        assert_eq!(tsl.sweep_speed_table().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn gpib_only_model_over_lan_is_refused() {
        let (link, _log) = scripted_device(DeviceKind::Tsl, |c| match c {
            "*IDN?" => Some("SANTEC,TSL-550,1,1".into()),
            _ => responder(c),
        });
        let tsl = SantecTsl::new(Arc::new(link), Interface::Lan, &TimeoutConfig::default());
        assert!(matches!(
            tsl.connect().await,
            Err(StsError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_parameters_return_actual_step() {
        let (tsl, log) = driver(Interface::Lan);
        tsl.connect().await.unwrap();
        let step = tsl
            .set_sweep_parameters(&SweepSettings {
                start_nm: 1500.0,
                stop_nm: 1600.0,
                step_nm: 0.001,
                speed_nm_per_s: 50.0,
                power_dbm: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(step, 0.001);
        drop(tsl);
        let sent = log.await.unwrap();
        assert!(sent.contains(&":WAV:SWE:STAR 1500.0000".to_string()));
        assert!(sent.contains(&":TRIG:INP:STAN 1".to_string()));
    }

    #[tokio::test]
    async fn sweep_outside_laser_range_is_parameter_error() {
        let (tsl, _log) = driver(Interface::Lan);
        tsl.connect().await.unwrap();
        let err = tsl
            .set_sweep_parameters(&SweepSettings {
                start_nm: 1400.0,
                stop_nm: 1600.0,
                step_nm: 0.001,
                speed_nm_per_s: 50.0,
                power_dbm: 0.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StsError::Parameter { .. }));
    }

    #[tokio::test]
    async fn power_above_limit_never_reaches_device() {
        let (tsl, log) = driver(Interface::Lan);
        assert!(matches!(
            tsl.set_power(12.0).await,
            Err(StsError::Parameter { .. })
        ));
        drop(tsl);
        assert!(log.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_wait_succeeds_on_matching_state() {
        let (tsl, _log) = driver(Interface::Lan);
        tsl.wait_for_sweep_status(SweepStatus::WaitingForTrigger, Duration::from_millis(500))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn status_wait_times_out() {
        let (tsl, _log) = driver(Interface::Lan);
        let err = tsl
            .wait_for_sweep_status(SweepStatus::Standby, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_synchronization_timeout());
    }

    #[test]
    fn identity_requires_santec() {
        assert_eq!(
            parse_identity("SANTEC,TSL-770,123,1.0"),
            Some(("TSL-770".into(), "123".into()))
        );
        assert_eq!(parse_identity("ACME,LASER,1,1"), None);
    }
}
