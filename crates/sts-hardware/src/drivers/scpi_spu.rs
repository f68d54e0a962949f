//! Sampling bridge driver for the monitor DAQ board.
//!
//! The DAQ board sits behind a small bridge that exposes it as a line-based
//! instrument (USB serial or TCP):
//! - `SAMP:PAR start,stop,speed,step,avg` configures a sampling run
//! - `SAMP:STAR` / `SAMP:STOP` start and stop it (stop accepted when idle)
//! - `SAMP:STAT?` answers 0 = idle, 1 = sampling, 2 = complete
//! - `SAMP:DATA:TRIG?` / `SAMP:DATA:MON?` return the captured channels
//! - `SYST:ERR?` answers `code,message`

use crate::capabilities::{MonitorSampler, SamplingData, SamplingParameters};
use crate::scpi::ScpiLink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sts_core::config::TimeoutConfig;
use sts_core::{DeviceKind, InstrumentStatus, StsError, StsResult};
use tokio::time::Instant;
use tracing::instrument;

const SAMPLING_COMPLETE: i64 = 2;

/// Driver for the SCPI sampling bridge.
pub struct ScpiSpu {
    link: Arc<ScpiLink>,
    poll_interval: Duration,
}

impl ScpiSpu {
    /// Create a driver on an opened link.
    pub fn new(link: Arc<ScpiLink>, timeouts: &TimeoutConfig) -> Self {
        Self {
            link,
            poll_interval: timeouts.poll_interval(),
        }
    }

    async fn check_error(&self, context: &str) -> StsResult<()> {
        let response = self.link.query("SYST:ERR?").await?;
        let code = response
            .split(',')
            .next()
            .and_then(|c| c.trim().parse::<i32>().ok())
            .unwrap_or(-1);
        if code == 0 {
            Ok(())
        } else {
            Err(StsError::device(
                DeviceKind::Spu,
                InstrumentStatus::from_code(code),
                format!("{context}: {response}"),
            ))
        }
    }
}

#[async_trait]
impl MonitorSampler for ScpiSpu {
    #[instrument(skip(self), err)]
    async fn connect(&self) -> StsResult<()> {
        let idn = self
            .link
            .query("*IDN?")
            .await
            .map_err(|e| StsError::connection(DeviceKind::Spu, e.to_string()))?;
        if idn.is_empty() {
            return Err(StsError::connection(DeviceKind::Spu, "empty identity"));
        }
        tracing::info!(identity = %idn, "SPU connected");
        Ok(())
    }

    async fn disconnect(&self) -> StsResult<()> {
        tracing::info!("SPU disconnected");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_sampling_parameters(&self, params: &SamplingParameters) -> StsResult<()> {
        if params.actual_step_nm <= 0.0 || params.speed_nm_per_s <= 0.0 {
            return Err(StsError::parameter(
                DeviceKind::Spu,
                "sampling step and speed must be positive",
            ));
        }
        self.link
            .write(&format!(
                "SAMP:PAR {:.4},{:.4},{:.3},{:.6},{:.4}",
                params.start_nm,
                params.stop_nm,
                params.speed_nm_per_s,
                params.actual_step_nm,
                params.averaging_time_ms
            ))
            .await?;
        self.check_error("set sampling parameters")
            .await
            .map_err(|e| StsError::parameter(DeviceKind::Spu, e.to_string()))
    }

    async fn start_sampling(&self) -> StsResult<()> {
        self.link.write("SAMP:STAR").await?;
        self.check_error("start sampling").await
    }

    async fn stop_sampling(&self) -> StsResult<()> {
        self.link.write("SAMP:STOP").await
    }

    async fn wait_for_sampling(&self, timeout: Duration) -> StsResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.link.query_i64("SAMP:STAT?").await? == SAMPLING_COMPLETE {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StsError::timeout(DeviceKind::Spu, "SamplingComplete", timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn sampling_data(&self) -> StsResult<SamplingData> {
        let trigger = self.link.query_list("SAMP:DATA:TRIG?").await?;
        let monitor = self.link.query_list("SAMP:DATA:MON?").await?;
        if trigger.len() != monitor.len() {
            return Err(StsError::device(
                DeviceKind::Spu,
                InstrumentStatus::CountMismatch,
                format!(
                    "trigger has {} samples, monitor has {}",
                    trigger.len(),
                    monitor.len()
                ),
            ));
        }
        Ok(SamplingData { trigger, monitor })
    }
}
