//! Operator interaction requested by the orchestrator.

use async_trait::async_trait;
use sts_core::{ChannelRef, StsResult};

/// The person at the bench.
///
/// The orchestrator blocks on these calls; an error aborts the running phase.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Ask for the reference fibre to be connected to `channel`.
    async fn confirm_reference_connection(&self, channel: ChannelRef) -> StsResult<()>;
}

/// Operator that confirms everything immediately. Used for simulation and
/// unattended runs where the optical switching is already in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoOperator;

#[async_trait]
impl Operator for AutoOperator {
    async fn confirm_reference_connection(&self, channel: ChannelRef) -> StsResult<()> {
        tracing::info!(%channel, "Reference connection assumed");
        Ok(())
    }
}
