//! Draining deployment detection and top-up sizing
//!
//! A deployment is draining when its escrow, projected forward from the last
//! settlement at its current block rate, runs out within the runway
//! threshold. Each draining deployment is topped up by enough to cover a
//! fixed window of blocks.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::{DeploymentEscrow, DeploymentSource};
use crate::error::Result;

/// A deployment that needs funding soon
#[derive(Debug, Clone, PartialEq)]
pub struct DrainingDeployment {
    pub dseq: String,
    pub denom: String,
    /// Spend per block
    pub block_rate: f64,
}

/// Finds the deployments of an owner that are about to run dry
///
/// The returned order is the top-up priority.
#[async_trait]
pub trait DrainingDeploymentFinder: Send + Sync {
    async fn find_draining(&self, owner: &str, denom: &str) -> Result<Vec<DrainingDeployment>>;
}

/// Maps a block rate to the amount added for the current window
///
/// Implementations must be monotonic in `block_rate` and never negative.
/// A zero amount means the deployment is skipped, without spending a fee.
pub trait TopUpAmountCalculator: Send + Sync {
    fn calculate(&self, block_rate: f64) -> u128;
}

/// Tops up `block_rate * window_blocks`, rounded down
#[derive(Debug, Clone, Copy)]
pub struct WindowAmountCalculator {
    window_blocks: u64,
}

impl WindowAmountCalculator {
    pub fn new(window_blocks: u64) -> Self {
        Self { window_blocks }
    }
}

impl TopUpAmountCalculator for WindowAmountCalculator {
    fn calculate(&self, block_rate: f64) -> u128 {
        if !block_rate.is_finite() || block_rate <= 0.0 {
            return 0;
        }
        // `as` saturates on overflow
        (block_rate * self.window_blocks as f64).floor() as u128
    }
}

/// Finder that projects escrow runway from chain state
pub struct EscrowDrainingFinder {
    source: Arc<dyn DeploymentSource>,
    threshold_blocks: u64,
}

impl EscrowDrainingFinder {
    pub fn new(source: Arc<dyn DeploymentSource>, threshold_blocks: u64) -> Self {
        Self {
            source,
            threshold_blocks,
        }
    }
}

/// Blocks left before the escrow is exhausted at `height`
fn runway_blocks(escrow: &DeploymentEscrow, height: u64) -> f64 {
    let elapsed = height.saturating_sub(escrow.settled_at) as f64;
    let remaining = (escrow.escrow_balance - elapsed * escrow.block_rate).max(0.0);
    remaining / escrow.block_rate
}

fn dseq_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[async_trait]
impl DrainingDeploymentFinder for EscrowDrainingFinder {
    async fn find_draining(&self, owner: &str, denom: &str) -> Result<Vec<DrainingDeployment>> {
        let height = self.source.latest_height().await?;
        let deployments = self.source.active_deployments(owner).await?;
        let threshold = self.threshold_blocks as f64;

        let mut draining: Vec<(f64, DeploymentEscrow)> = deployments
            .into_iter()
            .filter(|d| d.denom == denom && d.block_rate > 0.0)
            .map(|d| (runway_blocks(&d, height), d))
            .filter(|(runway, _)| *runway < threshold)
            .collect();

        // Closest to exhaustion first
        draining.sort_by(|(ra, a), (rb, b)| {
            ra.total_cmp(rb).then_with(|| dseq_order(&a.dseq, &b.dseq))
        });

        debug!(
            "Found {} draining deployment(s) for {} in {} at height {}",
            draining.len(),
            owner,
            denom,
            height
        );

        Ok(draining
            .into_iter()
            .map(|(_, d)| DrainingDeployment {
                dseq: d.dseq,
                denom: d.denom,
                block_rate: d.block_rate,
            })
            .collect())
    }
}
