//! Simulated monitor DAQ board.

use crate::bench::{SamplerState, Shared};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sts_core::{DeviceKind, InstrumentStatus, StsError, StsResult};
use sts_hardware::{MonitorSampler, SamplingData, SamplingParameters};

const DEVICE: DeviceKind = DeviceKind::Spu;

/// Mock monitor sampler.
pub struct MockSpu {
    shared: Arc<Shared>,
}

impl MockSpu {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl MonitorSampler for MockSpu {
    async fn connect(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "spu.connect")?;
        tracing::info!("Mock SPU connected");
        Ok(())
    }

    async fn disconnect(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "spu.disconnect")
    }

    async fn set_sampling_parameters(&self, params: &SamplingParameters) -> StsResult<()> {
        self.shared.call(DEVICE, "spu.set_sampling_parameters")?;
        if params.actual_step_nm <= 0.0 || params.speed_nm_per_s <= 0.0 {
            return Err(StsError::parameter(
                DEVICE,
                "sampling step and speed must be positive",
            ));
        }
        self.shared.state().sampling_params = Some(*params);
        Ok(())
    }

    async fn start_sampling(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "spu.start_sampling")?;
        let mut state = self.shared.state();
        if state.sampling_params.is_none() {
            return Err(StsError::parameter(DEVICE, "sampling parameters not set"));
        }
        state.sampler = SamplerState::Sampling;
        state.samples = SamplingData::default();
        Ok(())
    }

    async fn stop_sampling(&self) -> StsResult<()> {
        self.shared.call(DEVICE, "spu.stop_sampling")?;
        let mut state = self.shared.state();
        if state.sampler == SamplerState::Sampling {
            state.sampler = SamplerState::Idle;
        }
        Ok(())
    }

    async fn wait_for_sampling(&self, timeout: Duration) -> StsResult<()> {
        self.shared.call(DEVICE, "spu.wait_for_sampling")?;
        let complete = self.shared.state().sampler == SamplerState::Complete;
        if complete {
            return Ok(());
        }
        // Nothing will complete the run while we wait.
        tokio::time::sleep(timeout).await;
        Err(StsError::timeout(DEVICE, "SamplingComplete", timeout))
    }

    async fn sampling_data(&self) -> StsResult<SamplingData> {
        self.shared.call(DEVICE, "spu.sampling_data")?;
        let state = self.shared.state();
        if state.sampler != SamplerState::Complete {
            return Err(StsError::device(
                DEVICE,
                InstrumentStatus::Failure,
                "no completed sampling run",
            ));
        }
        Ok(state.samples.clone())
    }
}
