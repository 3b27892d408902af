//! Reconciliation engine
//!
//! One run walks every custodial wallet pair concurrently. For each pair the
//! deployment grants are paged in pages of `concurrency` and every grant of a
//! page is processed concurrently, at most `concurrency` at a time. Inside a
//! grant everything is sequential:
//!
//! ```text
//! grant → fee allowance → balance → draining set
//!       → for each deployment: amount → constraint check → deposit
//! ```
//!
//! A failing grant is reported and recorded, never propagated: every other
//! grant and every other pair still runs to completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::constraints::{BalanceSnapshot, ConstraintEngine, Limits};
use super::draining::{
    DrainingDeploymentFinder, EscrowDrainingFinder, TopUpAmountCalculator, WindowAmountCalculator,
};
use super::events::{EventSink, TopUpEvent};
use super::executor::{DepositRequest, TopUpExecutor};
use crate::chain::{BalanceSource, FeeAllowanceSource, Grant, GrantSource, LcdClient};
use crate::config::{Config, ReconciliationConfig};
use crate::error::{Error, Result};
use crate::wallet::{SigningClient, WalletClientPair};

/// Static reconciliation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Grants in flight per wallet pair, and the grant page size
    pub concurrency: usize,
    /// Fee allowance consumed by each top-up transaction
    pub fee_reserve: u128,
}

impl EngineSettings {
    pub fn new(concurrency: usize, fee_reserve: u128) -> Self {
        Self {
            concurrency: concurrency.max(1),
            fee_reserve,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(10, 5000)
    }
}

impl From<&ReconciliationConfig> for EngineSettings {
    fn from(config: &ReconciliationConfig) -> Self {
        Self::new(config.concurrency, u128::from(config.fee_reserve))
    }
}

/// Chain queries the engine depends on
#[derive(Clone)]
pub struct ChainServices {
    pub grants: Arc<dyn GrantSource>,
    pub fee_allowances: Arc<dyn FeeAllowanceSource>,
    pub balances: Arc<dyn BalanceSource>,
}

impl ChainServices {
    /// Serve every query from one LCD client
    pub fn from_lcd(client: Arc<LcdClient>) -> Self {
        Self {
            grants: client.clone(),
            fee_allowances: client.clone(),
            balances: client,
        }
    }
}

/// How processing a single grant ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GrantStatus {
    /// Every draining deployment was topped up (possibly none)
    Completed { topped_up: usize, remaining: Limits },
    /// Stopped at the first deployment the limits could not cover
    InsufficientBalance { topped_up: usize, remaining: Limits },
    /// An external call or the chain data failed
    Failed { topped_up: usize, error: String },
}

impl GrantStatus {
    pub fn topped_up(&self) -> usize {
        match self {
            GrantStatus::Completed { topped_up, .. }
            | GrantStatus::InsufficientBalance { topped_up, .. }
            | GrantStatus::Failed { topped_up, .. } => *topped_up,
        }
    }
}

/// Result of one grant, attributable on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    pub granter: String,
    pub grantee: String,
    pub denom: String,
    #[serde(flatten)]
    pub status: GrantStatus,
}

/// Everything that happened for one wallet pair
#[derive(Debug, Clone, Default, Serialize)]
pub struct PairReport {
    pub name: String,
    pub address: Option<String>,
    pub pages: usize,
    pub outcomes: Vec<GrantOutcome>,
    /// Set when the pair could not be processed to the end
    pub error: Option<String>,
    pub cancelled: bool,
}

impl PairReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Summary of one reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pairs: Vec<PairReport>,
}

impl RunReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &GrantOutcome> {
        self.pairs.iter().flat_map(|p| p.outcomes.iter())
    }

    pub fn grants_processed(&self) -> usize {
        self.outcomes().count()
    }

    pub fn top_ups(&self) -> usize {
        self.outcomes().map(|o| o.status.topped_up()).sum()
    }

    pub fn failed_grants(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o.status, GrantStatus::Failed { .. }))
            .count()
    }

    pub fn insufficient_grants(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o.status, GrantStatus::InsufficientBalance { .. }))
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.pairs.iter().any(|p| p.cancelled)
    }
}

/// Orchestrates top-ups across all custodial wallet pairs
pub struct ReconciliationEngine {
    settings: EngineSettings,
    pairs: Vec<WalletClientPair>,
    chain: ChainServices,
    finder: Arc<dyn DrainingDeploymentFinder>,
    calculator: Arc<dyn TopUpAmountCalculator>,
    constraints: ConstraintEngine,
    executor: TopUpExecutor,
    events: Arc<dyn EventSink>,
}

impl ReconciliationEngine {
    pub fn new(
        settings: EngineSettings,
        pairs: Vec<WalletClientPair>,
        chain: ChainServices,
        finder: Arc<dyn DrainingDeploymentFinder>,
        calculator: Arc<dyn TopUpAmountCalculator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            pairs,
            chain,
            finder,
            calculator,
            constraints: ConstraintEngine::new(settings.fee_reserve),
            executor: TopUpExecutor::new(events.clone()),
            events,
        }
    }

    /// Wire the engine to the LCD endpoint and signing services in `config`
    pub fn from_config(config: &Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let lcd = Arc::new(LcdClient::new(&config.chain)?);
        let pairs = WalletClientPair::from_config(&config.wallets, &config.chain)?;

        let finder = Arc::new(EscrowDrainingFinder::new(
            lcd.clone(),
            config.draining.runway_threshold_blocks(),
        ));
        let calculator = Arc::new(WindowAmountCalculator::new(
            config.draining.top_up_window_blocks(),
        ));

        Ok(Self::new(
            EngineSettings::from(&config.reconciliation),
            pairs,
            ChainServices::from_lcd(lcd),
            finder,
            calculator,
            events,
        ))
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Run one full reconciliation pass
    pub async fn run(&self) -> Result<RunReport> {
        self.run_until_cancelled(&CancellationToken::new()).await
    }

    /// Run one pass, starting no new pages or grants once `cancel` fires
    ///
    /// Grants already in flight are allowed to finish.
    pub async fn run_until_cancelled(&self, cancel: &CancellationToken) -> Result<RunReport> {
        if self.pairs.is_empty() {
            return Err(Error::NoWalletPairs);
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("reconciliation", %run_id);

        let pairs = join_all(
            self.pairs
                .iter()
                .map(|pair| self.reconcile_pair(pair, cancel)),
        )
        .instrument(span)
        .await;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            pairs,
        };

        info!(
            %run_id,
            "Reconciliation finished: {} grant(s), {} top-up(s), {} insufficient, {} failed{}",
            report.grants_processed(),
            report.top_ups(),
            report.insufficient_grants(),
            report.failed_grants(),
            if report.was_cancelled() { " (cancelled)" } else { "" }
        );

        Ok(report)
    }

    /// Drive every page of grants for one wallet pair
    async fn reconcile_pair(&self, pair: &WalletClientPair, cancel: &CancellationToken) -> PairReport {
        let mut report = PairReport::new(&pair.name);

        let address = match pair.wallet.first_address().await {
            Ok(address) => address,
            Err(e) => {
                error!(wallet = %pair.name, "Failed to derive funding address: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.address = Some(address.clone());

        let client = pair.client.as_ref();
        let mut page_key: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let page = match self
                .chain
                .grants
                .list_grants(&address, self.settings.concurrency, page_key.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(wallet = %pair.name, grantee = %address, "Failed to list grants: {}", e);
                    report.error = Some(e.to_string());
                    break;
                }
            };
            report.pages += 1;

            debug!(
                wallet = %pair.name,
                "Processing page {} with {} grant(s)",
                report.pages,
                page.grants.len()
            );

            let outcomes: Vec<Option<GrantOutcome>> = stream::iter(page.grants)
                .map(|grant| async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.process_grant(grant, client).await)
                })
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Some(outcome) => report.outcomes.push(outcome),
                    None => report.cancelled = true,
                }
            }

            page_key = page.next_key;
            if page_key.is_none() {
                break;
            }
        }

        report
    }

    /// Process one grant, turning any failure into a reported outcome
    async fn process_grant(&self, grant: Grant, client: &dyn SigningClient) -> GrantOutcome {
        let span = info_span!("grant", granter = %grant.granter, grantee = %grant.grantee);
        let mut topped_up = 0;

        let result = self
            .top_up_grant(&grant, client, &mut topped_up)
            .instrument(span)
            .await;

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                self.events.emit(TopUpEvent::TopUpError {
                    granter: grant.granter.clone(),
                    grantee: grant.grantee.clone(),
                    denom: grant.denom().to_string(),
                    error: e.to_string(),
                });
                GrantStatus::Failed {
                    topped_up,
                    error: e.to_string(),
                }
            }
        };

        GrantOutcome {
            denom: grant.denom().to_string(),
            granter: grant.granter,
            grantee: grant.grantee,
            status,
        }
    }

    /// Top up the draining deployments of one grant, in order
    async fn top_up_grant(
        &self,
        grant: &Grant,
        client: &dyn SigningClient,
        topped_up: &mut usize,
    ) -> Result<GrantStatus> {
        let mut snapshot = self.collect_balances(grant).await?;
        let draining = self
            .finder
            .find_draining(&grant.granter, &snapshot.denom)
            .await?;

        for deployment in draining {
            let amount = self.calculator.calculate(deployment.block_rate);
            if amount == 0 {
                debug!(
                    "Skipping dseq {}: block rate {} rounds to a zero top-up",
                    deployment.dseq, deployment.block_rate
                );
                continue;
            }

            let Some(next) = self.constraints.try_reserve(amount, &snapshot) else {
                self.events.emit(TopUpEvent::InsufficientBalance {
                    granter: grant.granter.clone(),
                    grantee: grant.grantee.clone(),
                    denom: snapshot.denom.clone(),
                    balances: snapshot.limits(),
                });
                return Ok(GrantStatus::InsufficientBalance {
                    topped_up: *topped_up,
                    remaining: snapshot.limits(),
                });
            };
            // Deducted before submitting; a failed submission keeps the deduction
            snapshot = next;

            let request = DepositRequest {
                dseq: deployment.dseq,
                amount,
                denom: deployment.denom,
                owner: grant.granter.clone(),
                grantee: grant.grantee.clone(),
            };
            self.executor.execute(&request, client).await?;
            *topped_up += 1;
        }

        Ok(GrantStatus::Completed {
            topped_up: *topped_up,
            remaining: snapshot.limits(),
        })
    }

    /// Read the three limits once, at the start of a grant
    async fn collect_balances(&self, grant: &Grant) -> Result<BalanceSnapshot> {
        let denom = grant.denom().to_string();
        let deployment_limit = grant.deployment_limit()?;

        let fees_limit = self
            .chain
            .fee_allowances
            .fee_allowance(&grant.granter, &grant.grantee)
            .await?
            .remaining(&denom)?;

        let balance = self
            .chain
            .balances
            .balance(&grant.granter, &denom)
            .await?;
        if balance.denom != denom {
            warn!(
                "Balance query for {} returned denom {}, expected {}",
                grant.granter, balance.denom, denom
            );
        }

        Ok(BalanceSnapshot {
            fees_limit,
            deployment_limit,
            balance: balance.base_units()?,
            denom,
        })
    }
}
