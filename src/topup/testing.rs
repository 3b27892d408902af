//! In-memory doubles for engine tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::draining::{DrainingDeployment, DrainingDeploymentFinder};
use crate::chain::{
    BalanceSource, Coin, DeploymentEscrow, DeploymentSource, FeeAllowance, FeeAllowanceSource,
    Grant, GrantPage, GrantSource,
};
use crate::error::{Error, Result};
use crate::wallet::{CustodialWallet, EncodedMessage, SigningClient, TxReceipt};

/// Grants, fee allowances and balances held in memory
#[derive(Default)]
pub struct InMemoryChain {
    grants: Vec<Grant>,
    fee_allowances: HashMap<(String, String), FeeAllowance>,
    balances: HashMap<(String, String), u128>,
    failing_granters: HashSet<String>,
    failing_grantees: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    page_requests: AtomicUsize,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(mut self, granter: &str, grantee: &str, denom: &str, limit: u128) -> Self {
        self.grants.push(Grant {
            granter: granter.to_string(),
            grantee: grantee.to_string(),
            spend_limit: Coin::new(denom, limit),
        });
        self
    }

    pub fn with_fee_allowance(mut self, granter: &str, grantee: &str, denom: &str, amount: u128) -> Self {
        self.fee_allowances
            .entry((granter.to_string(), grantee.to_string()))
            .or_default()
            .spend_limit
            .push(Coin::new(denom, amount));
        self
    }

    pub fn with_balance(mut self, address: &str, denom: &str, amount: u128) -> Self {
        self.balances
            .insert((address.to_string(), denom.to_string()), amount);
        self
    }

    /// Balance lookups for `granter` fail
    pub fn failing_balance_for(mut self, granter: &str) -> Self {
        self.failing_granters.insert(granter.to_string());
        self
    }

    /// Grant listing for `grantee` fails
    pub fn failing_grants_for(mut self, grantee: &str) -> Self {
        self.failing_grantees.insert(grantee.to_string());
        self
    }

    /// Each balance lookup takes this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantSource for InMemoryChain {
    async fn list_grants(
        &self,
        grantee: &str,
        page_size: usize,
        page_key: Option<&str>,
    ) -> Result<GrantPage> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);

        if self.failing_grantees.contains(grantee) {
            return Err(Error::Http("grant listing unavailable".to_string()));
        }

        let start: usize = match page_key {
            Some(key) => key
                .parse()
                .map_err(|_| Error::UnexpectedData(format!("bad page key {}", key)))?,
            None => 0,
        };

        let matching: Vec<&Grant> = self.grants.iter().filter(|g| g.grantee == grantee).collect();
        let end = (start + page_size).min(matching.len());
        let grants = matching[start.min(end)..end].iter().map(|g| (*g).clone()).collect();
        let next_key = (end < matching.len()).then(|| end.to_string());

        Ok(GrantPage { grants, next_key })
    }
}

#[async_trait]
impl FeeAllowanceSource for InMemoryChain {
    async fn fee_allowance(&self, granter: &str, grantee: &str) -> Result<FeeAllowance> {
        Ok(self
            .fee_allowances
            .get(&(granter.to_string(), grantee.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl BalanceSource for InMemoryChain {
    async fn balance(&self, address: &str, denom: &str) -> Result<Coin> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_granters.contains(address) {
            return Err(Error::Rpc(format!("balance unavailable for {}", address)));
        }

        let amount = self
            .balances
            .get(&(address.to_string(), denom.to_string()))
            .copied()
            .unwrap_or(0);
        Ok(Coin::new(denom, amount))
    }
}

/// Draining sets keyed by owner
#[derive(Default)]
pub struct StaticFinder {
    draining: HashMap<String, Vec<DrainingDeployment>>,
}

impl StaticFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draining(mut self, owner: &str, denom: &str, deployments: &[(&str, f64)]) -> Self {
        self.draining.insert(
            owner.to_string(),
            deployments
                .iter()
                .map(|(dseq, block_rate)| DrainingDeployment {
                    dseq: dseq.to_string(),
                    denom: denom.to_string(),
                    block_rate: *block_rate,
                })
                .collect(),
        );
        self
    }
}

#[async_trait]
impl DrainingDeploymentFinder for StaticFinder {
    async fn find_draining(&self, owner: &str, denom: &str) -> Result<Vec<DrainingDeployment>> {
        Ok(self
            .draining
            .get(owner)
            .map(|all| all.iter().filter(|d| d.denom == denom).cloned().collect())
            .unwrap_or_default())
    }
}

/// Deployment escrows at a fixed height
pub struct StaticDeployments {
    height: u64,
    deployments: Vec<DeploymentEscrow>,
}

impl StaticDeployments {
    pub fn new(height: u64, deployments: Vec<DeploymentEscrow>) -> Self {
        Self {
            height,
            deployments,
        }
    }
}

#[async_trait]
impl DeploymentSource for StaticDeployments {
    async fn active_deployments(&self, _owner: &str) -> Result<Vec<DeploymentEscrow>> {
        Ok(self.deployments.clone())
    }

    async fn latest_height(&self) -> Result<u64> {
        Ok(self.height)
    }
}

/// Signing client that records every submitted transaction
#[derive(Default)]
pub struct RecordingClient {
    submitted: Mutex<Vec<Vec<EncodedMessage>>>,
    fail_dseq: Option<String>,
}

impl RecordingClient {
    /// Fail any transaction depositing into `dseq`
    pub fn failing_on(dseq: &str) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            fail_dseq: Some(dseq.to_string()),
        }
    }

    pub fn submitted(&self) -> Vec<Vec<EncodedMessage>> {
        self.submitted.lock().unwrap().clone()
    }

    /// Deposited dseqs, in submission order
    pub fn deposited_dseqs(&self) -> Vec<String> {
        self.submitted()
            .iter()
            .flatten()
            .filter_map(deposit_dseq)
            .collect()
    }
}

fn deposit_dseq(message: &EncodedMessage) -> Option<String> {
    message.value["msgs"][0]["value"]["id"]["dseq"]
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl SigningClient for RecordingClient {
    async fn execute_tx(&self, messages: Vec<EncodedMessage>) -> Result<TxReceipt> {
        let failing = self.fail_dseq.as_deref();
        if messages
            .iter()
            .any(|m| deposit_dseq(m).as_deref() == failing && failing.is_some())
        {
            return Err(Error::TransactionSend("broadcast rejected".to_string()));
        }

        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(messages);
        Ok(TxReceipt {
            transaction_hash: format!("TX{}", submitted.len()),
        })
    }
}

/// Wallet whose address lookup fails
pub struct BrokenWallet;

#[async_trait]
impl CustodialWallet for BrokenWallet {
    async fn first_address(&self) -> Result<String> {
        Err(Error::Wallet("keyring locked".to_string()))
    }
}
