//! Santec MPM-210 power meter driver.
//!
//! Protocol overview:
//! - `IDIS?` lists the module in each of the five slots (`NONE` for empty)
//! - `LEV n` selects the dynamic range on every module
//! - `STAR`/`STOP`/`STE`/`SPE`/`LOGN` configure logging, `AVG` the averaging time
//! - `MEAS` starts logging and `STOP` stops it (accepted when idle)
//! - `STAT?` answers `status,points` with status 0 = logging,
//!   1 = completed, -1 = stopped
//! - `LOGG? slot,channel` returns the logged power as a comma separated list
//! - `ERR?` answers `code,message`; code 0 means no error

use crate::capabilities::{LoggingPowerMeter, LoggingStatus};
use crate::scpi::ScpiLink;
use async_trait::async_trait;
use std::sync::Arc;
use sts_core::config::{points_between, SweepSettings};
use sts_core::device::{ModuleType, MPM_SLOT_COUNT};
use sts_core::selection::available_ranges;
use sts_core::{DeviceKind, InstrumentStatus, StsError, StsResult};
use tokio::sync::Mutex;
use tracing::instrument;

/// Driver for the Santec MPM-210 main frame.
pub struct SantecMpm {
    link: Arc<ScpiLink>,
    modules: Mutex<Vec<(u8, ModuleType)>>,
}

impl SantecMpm {
    /// Create a driver on an opened link.
    pub fn new(link: Arc<ScpiLink>) -> Self {
        Self {
            link,
            modules: Mutex::new(Vec::new()),
        }
    }

    async fn check_error(&self, context: &str) -> StsResult<()> {
        let response = self.link.query("ERR?").await?;
        let (code, message) = response.split_once(',').unwrap_or((response.as_str(), ""));
        match code.trim().parse::<i32>() {
            Ok(0) => Ok(()),
            Ok(code) => Err(StsError::device(
                DeviceKind::Mpm,
                InstrumentStatus::DeviceError,
                format!("{context}: {code},{}", message.trim()),
            )),
            Err(_) => Err(StsError::device(
                DeviceKind::Mpm,
                InstrumentStatus::DeviceError,
                format!("{context}: unreadable error response '{response}'"),
            )),
        }
    }

    async fn read_modules(&self) -> StsResult<Vec<(u8, ModuleType)>> {
        let response = self.link.query("IDIS?").await?;
        let modules: Vec<(u8, ModuleType)> = response
            .split(',')
            .take(MPM_SLOT_COUNT as usize)
            .enumerate()
            .filter_map(|(slot, id)| ModuleType::parse(id).map(|m| (slot as u8, m)))
            .collect();
        if modules.is_empty() {
            return Err(StsError::connection(
                DeviceKind::Mpm,
                "no modules detected in the power meter",
            ));
        }
        Ok(modules)
    }
}

fn parse_logging_status(response: &str) -> Option<LoggingStatus> {
    let (status, points) = response.split_once(',')?;
    let points = points.trim().parse::<usize>().ok()?;
    match status.trim().parse::<i32>().ok()? {
        0 => Some(LoggingStatus::Logging { points }),
        1 => Some(LoggingStatus::Completed { points }),
        -1 | 10 => Some(LoggingStatus::Stopped),
        _ => None,
    }
}

#[async_trait]
impl LoggingPowerMeter for SantecMpm {
    #[instrument(skip(self), err)]
    async fn connect(&self) -> StsResult<()> {
        let idn = self
            .link
            .query("*IDN?")
            .await
            .map_err(|e| StsError::connection(DeviceKind::Mpm, e.to_string()))?;
        if !idn.to_ascii_uppercase().contains("MPM") {
            return Err(StsError::connection(
                DeviceKind::Mpm,
                format!("unexpected identity '{idn}'"),
            ));
        }
        let modules = self.read_modules().await?;
        // Rejects a frame mixing MPM-215 with other modules.
        available_ranges(&modules).map_err(|e| StsError::connection(DeviceKind::Mpm, e.to_string()))?;
        tracing::info!(
            modules = ?modules.iter().map(|(s, m)| format!("{s}:{m}")).collect::<Vec<_>>(),
            "MPM connected"
        );
        *self.modules.lock().await = modules;
        Ok(())
    }

    async fn disconnect(&self) -> StsResult<()> {
        self.modules.lock().await.clear();
        tracing::info!("MPM disconnected");
        Ok(())
    }

    async fn modules(&self) -> StsResult<Vec<(u8, ModuleType)>> {
        let cached = self.modules.lock().await.clone();
        if cached.is_empty() {
            return self.read_modules().await;
        }
        Ok(cached)
    }

    #[instrument(skip(self), err)]
    async fn set_range(&self, range: u8) -> StsResult<()> {
        let allowed = self.available_ranges().await?;
        if !allowed.contains(&range) {
            return Err(StsError::parameter(
                DeviceKind::Mpm,
                format!("range {range} not supported (available: {allowed:?})"),
            ));
        }
        self.link.write(&format!("LEV {range}")).await?;
        self.check_error("set range").await
    }

    async fn averaging_time_ms(&self) -> StsResult<f64> {
        self.link.query_f64("AVG?").await
    }

    #[instrument(skip(self), err)]
    async fn set_logging_parameters(&self, sweep: &SweepSettings) -> StsResult<()> {
        sweep
            .validate()
            .map_err(|e| StsError::parameter(DeviceKind::Mpm, e.to_string()))?;
        let points = points_between(sweep.start_nm, sweep.stop_nm, sweep.step_nm);
        // One averaging window per trigger step.
        let averaging_ms = sweep.step_nm / sweep.speed_nm_per_s * 1000.0;
        for command in [
            "WMOD FREE".to_string(),
            format!("STAR {:.4}", sweep.start_nm),
            format!("STOP {:.4}", sweep.stop_nm),
            format!("STE {:.4}", sweep.step_nm),
            format!("SPE {:.3}", sweep.speed_nm_per_s),
            format!("LOGN {points}"),
            format!("AVG {averaging_ms:.4}"),
        ] {
            self.link.write(&command).await?;
        }
        self.check_error("set logging parameters")
            .await
            .map_err(|e| StsError::parameter(DeviceKind::Mpm, e.to_string()))
    }

    async fn start_logging(&self) -> StsResult<()> {
        self.link.write("MEAS").await?;
        self.check_error("start logging").await
    }

    async fn stop_logging(&self) -> StsResult<()> {
        self.link.write("STOP").await?;
        tracing::debug!("MPM logging stopped");
        Ok(())
    }

    async fn logging_status(&self) -> StsResult<LoggingStatus> {
        let response = self.link.query("STAT?").await?;
        parse_logging_status(&response).ok_or_else(|| {
            StsError::device(
                DeviceKind::Mpm,
                InstrumentStatus::DeviceError,
                format!("unexpected logging status '{response}'"),
            )
        })
    }

    async fn channel_log_data(&self, slot: u8, channel: u8) -> StsResult<Vec<f64>> {
        let data = self.link.query_list(&format!("LOGG? {slot},{channel}")).await?;
        tracing::debug!(slot, channel, points = data.len(), "MPM log data read");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::test_support::scripted_device;

    fn meter(status: &'static str) -> (SantecMpm, tokio::task::JoinHandle<Vec<String>>) {
        let (link, log) = scripted_device(DeviceKind::Mpm, move |command| match command {
            "*IDN?" => Some("SANTEC,MPM-210H,1234,1.00".into()),
            "IDIS?" => Some("MPM-211,MPM-212,NONE,NONE,NONE".into()),
            "ERR?" => Some("0,No error".into()),
            "STAT?" => Some(status.into()),
            "AVG?" => Some("0.0200".into()),
            c if c.starts_with("LOGG?") => Some("-10.5,-10.4,-10.6".into()),
            _ => None,
        });
        (SantecMpm::new(Arc::new(link)), log)
    }

    #[tokio::test]
    async fn connect_reads_modules() {
        let (mpm, _log) = meter("1,3");
        mpm.connect().await.unwrap();
        let modules = mpm.modules().await.unwrap();
        assert_eq!(modules, vec![(0, ModuleType::Mpm211), (1, ModuleType::Mpm212)]);
        assert_eq!(mpm.channel_matrix().await.unwrap().channels().count(), 6);
    }

    #[tokio::test]
    async fn unsupported_range_is_parameter_error() {
        let (mpm, log) = meter("1,3");
        mpm.connect().await.unwrap();
        assert!(matches!(
            mpm.set_range(6).await,
            Err(StsError::Parameter { .. })
        ));
        mpm.set_range(3).await.unwrap();
        drop(mpm);
        let sent = log.await.unwrap();
        assert!(sent.contains(&"LEV 3".to_string()));
        assert!(!sent.contains(&"LEV 6".to_string()));
    }

    #[tokio::test]
    async fn mixed_215_frame_fails_to_connect() {
        let (link, _log) = scripted_device(DeviceKind::Mpm, |command| match command {
            "*IDN?" => Some("SANTEC,MPM-210H,1,1".into()),
            "IDIS?" => Some("MPM-215,MPM-211,NONE,NONE,NONE".into()),
            _ => None,
        });
        let mpm = SantecMpm::new(Arc::new(link));
        assert!(matches!(
            mpm.connect().await,
            Err(StsError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn no_points_while_logging_is_trigger_cable_error() {
        let (mpm, _log) = meter("0,0");
        assert!(matches!(
            mpm.wait_for_log_completion().await,
            Err(StsError::TriggerCable)
        ));
    }

    #[tokio::test]
    async fn completed_logging_and_data() {
        let (mpm, _log) = meter("1,3");
        assert_eq!(mpm.wait_for_log_completion().await.unwrap(), 3);
        assert_eq!(
            mpm.channel_log_data(0, 1).await.unwrap(),
            vec![-10.5, -10.4, -10.6]
        );
    }

    #[tokio::test]
    async fn logging_parameters_set_points_and_averaging() {
        let (mpm, log) = meter("1,3");
        mpm.set_logging_parameters(&SweepSettings {
            start_nm: 1500.0,
            stop_nm: 1501.0,
            step_nm: 0.1,
            speed_nm_per_s: 10.0,
            power_dbm: 0.0,
        })
        .await
        .unwrap();
        drop(mpm);
        let sent = log.await.unwrap();
        assert!(sent.contains(&"LOGN 11".to_string()));
        assert!(sent.contains(&"AVG 10.0000".to_string()));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(
            parse_logging_status("0,12"),
            Some(LoggingStatus::Logging { points: 12 })
        );
        assert_eq!(parse_logging_status("-1,0"), Some(LoggingStatus::Stopped));
        assert_eq!(parse_logging_status("x"), None);
    }
}
