//! Capabilities the reconciler consumes from the chain

use async_trait::async_trait;

use super::types::{Coin, DeploymentEscrow, FeeAllowance, GrantPage};
use crate::error::Result;

/// Paginated provider of deployment spend grants
#[async_trait]
pub trait GrantSource: Send + Sync {
    /// Fetch one page of deployment grants given to `grantee`
    ///
    /// `page_key` is `None` for the first page and the previous page's
    /// `next_key` afterwards.
    async fn list_grants(
        &self,
        grantee: &str,
        page_size: usize,
        page_key: Option<&str>,
    ) -> Result<GrantPage>;
}

/// Fee allowances between a granter and a grantee
#[async_trait]
pub trait FeeAllowanceSource: Send + Sync {
    /// A missing allowance is returned as an empty spend limit
    async fn fee_allowance(&self, granter: &str, grantee: &str) -> Result<FeeAllowance>;
}

/// On-chain account balances
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, address: &str, denom: &str) -> Result<Coin>;
}

/// Active deployments and their escrow accounts
#[async_trait]
pub trait DeploymentSource: Send + Sync {
    async fn active_deployments(&self, owner: &str) -> Result<Vec<DeploymentEscrow>>;

    async fn latest_height(&self) -> Result<u64>;
}
