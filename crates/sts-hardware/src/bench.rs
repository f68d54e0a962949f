//! The three instruments of one test station, as trait objects.

use crate::capabilities::{LoggingPowerMeter, MonitorSampler, SweepLaser};
use crate::drivers::{SantecMpm, SantecTsl, ScpiSpu};
use crate::transport::TransportContext;
use std::sync::Arc;
use sts_core::config::TimeoutConfig;
use sts_core::{DeviceKind, StsResult};

/// Laser, power meter and monitor sampler driven together.
#[derive(Clone)]
pub struct Bench {
    /// Tunable laser
    pub tsl: Arc<dyn SweepLaser>,
    /// Power meter
    pub mpm: Arc<dyn LoggingPowerMeter>,
    /// Monitor sampler
    pub spu: Arc<dyn MonitorSampler>,
}

impl Bench {
    /// Bundle already constructed devices.
    pub fn new(
        tsl: Arc<dyn SweepLaser>,
        mpm: Arc<dyn LoggingPowerMeter>,
        spu: Arc<dyn MonitorSampler>,
    ) -> Self {
        Self { tsl, mpm, spu }
    }

    /// Open links through `context` and build the Santec/SCPI drivers.
    ///
    /// Devices are not connected yet; call [`Bench::connect_all`].
    pub async fn from_context(context: &TransportContext, timeouts: &TimeoutConfig) -> StsResult<Self> {
        let tsl_interface = context.endpoint(DeviceKind::Tsl).interface();
        let tsl = SantecTsl::new(context.link(DeviceKind::Tsl).await?, tsl_interface, timeouts);
        let mpm = SantecMpm::new(context.link(DeviceKind::Mpm).await?);
        let spu = ScpiSpu::new(context.link(DeviceKind::Spu).await?, timeouts);
        Ok(Self::new(Arc::new(tsl), Arc::new(mpm), Arc::new(spu)))
    }

    /// Connect laser, power meter and sampler in that order.
    pub async fn connect_all(&self) -> StsResult<()> {
        let info = self.tsl.connect().await?;
        tracing::info!(model = %info.model, serial = %info.serial, "Laser ready");
        self.mpm.connect().await?;
        self.spu.connect().await?;
        Ok(())
    }

    /// Disconnect every device concurrently. Failures are logged and the
    /// first is returned after all devices were tried.
    pub async fn disconnect_all(&self) -> StsResult<()> {
        let (tsl, mpm, spu) = futures::join!(
            self.tsl.disconnect(),
            self.mpm.disconnect(),
            self.spu.disconnect()
        );
        let results = [tsl, mpm, spu];
        let mut first = None;
        for (kind, result) in DeviceKind::ALL.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(device = %kind, error = %e, "Disconnect failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
