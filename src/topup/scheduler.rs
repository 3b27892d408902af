//! Periodic reconciliation
//!
//! Runs never overlap: the next tick is taken only after the previous run
//! has returned, and missed ticks are delayed rather than bunched up.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::engine::ReconciliationEngine;

pub struct Scheduler {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<ReconciliationEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run reconciliation every interval until `cancel` fires
    ///
    /// The first run starts immediately. Returns the number of runs started.
    pub async fn run(&self, cancel: CancellationToken) -> usize {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0;

        info!("Reconciliation scheduled every {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            runs += 1;
            match self.engine.run_until_cancelled(&cancel).await {
                Ok(report) => info!(
                    run = runs,
                    run_id = %report.run_id,
                    "Run complete: {} top-up(s) across {} grant(s)",
                    report.top_ups(),
                    report.grants_processed()
                ),
                Err(e) => error!(run = runs, "Reconciliation run failed: {}", e),
            }
        }

        info!("Scheduler stopped after {} run(s)", runs);
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topup::draining::WindowAmountCalculator;
    use crate::topup::engine::{ChainServices, EngineSettings};
    use crate::topup::events::ChannelEventSink;
    use crate::topup::testing::{InMemoryChain, RecordingClient, StaticFinder};
    use crate::wallet::{StaticWallet, WalletClientPair};

    #[tokio::test]
    async fn test_runs_repeatedly_until_cancelled() {
        let chain = Arc::new(InMemoryChain::new().with_grant("akash1owner", "akash1master", "uakt", 1));
        let (sink, _rx) = ChannelEventSink::new();
        let engine = ReconciliationEngine::new(
            EngineSettings::default(),
            vec![WalletClientPair::new(
                "primary",
                Arc::new(StaticWallet::new("akash1master")),
                Arc::new(RecordingClient::default()),
            )],
            ChainServices {
                grants: chain.clone(),
                fee_allowances: chain.clone(),
                balances: chain.clone(),
            },
            Arc::new(StaticFinder::new()),
            Arc::new(WindowAmountCalculator::new(10)),
            Arc::new(sink),
        );
        let scheduler = Scheduler::new(Arc::new(engine), Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let stopper = async {
            while chain.page_requests() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        };

        let (runs, _) = tokio::join!(scheduler.run(cancel.clone()), stopper);

        // A run started right before cancellation fetches no page
        assert!(chain.page_requests() >= 3);
        assert!(runs >= chain.page_requests());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (sink, _rx) = ChannelEventSink::new();
        let chain = Arc::new(InMemoryChain::new());
        let engine = ReconciliationEngine::new(
            EngineSettings::default(),
            vec![],
            ChainServices {
                grants: chain.clone(),
                fee_allowances: chain.clone(),
                balances: chain,
            },
            Arc::new(StaticFinder::new()),
            Arc::new(WindowAmountCalculator::new(10)),
            Arc::new(sink),
        );
        let scheduler = Scheduler::new(Arc::new(engine), Duration::from_secs(3600));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(scheduler.run(cancel).await, 0);
    }
}
