//! Cosmos LCD (REST) client
//!
//! Implements every chain capability the reconciler needs against a single
//! LCD endpoint. Transient HTTP failures are retried here with exponential
//! backoff; the reconciliation core itself never retries.
//!
//! Endpoints used:
//! - `/cosmos/authz/v1beta1/grants/grantee/{grantee}`
//! - `/cosmos/feegrant/v1beta1/allowance/{granter}/{grantee}`
//! - `/cosmos/bank/v1beta1/balances/{address}/by_denom`
//! - `/akash/deployment/v1beta3/deployments/list`
//! - `/akash/market/v1beta4/leases/list`
//! - `/cosmos/base/tendermint/v1beta1/blocks/latest`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::sources::{BalanceSource, DeploymentSource, FeeAllowanceSource, GrantSource};
use super::types::{parse_decimal, Coin, DeploymentEscrow, FeeAllowance, Grant, GrantPage};
use crate::config::ChainConfig;
use crate::error::{Error, Result};

/// Authorization type suffixes that authorize deployment deposits
const DEPOSIT_AUTHORIZATION_TYPES: &[&str] = &[
    "DepositDeploymentAuthorization",
    "escrow.v1.DepositAuthorization",
];

/// Page size used when listing deployments and leases
const LIST_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Wire types (fields consumed only)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GrantsResponse {
    #[serde(default)]
    grants: Vec<GrantAuthorization>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct GrantAuthorization {
    granter: String,
    grantee: String,
    authorization: Authorization,
}

#[derive(Debug, Deserialize)]
struct Authorization {
    #[serde(rename = "@type")]
    type_url: String,
    #[serde(default)]
    spend_limit: Option<Coin>,
}

impl GrantAuthorization {
    fn into_deployment_grant(self) -> Option<Grant> {
        let is_deposit = DEPOSIT_AUTHORIZATION_TYPES
            .iter()
            .any(|suffix| self.authorization.type_url.ends_with(suffix));
        if !is_deposit {
            return None;
        }

        let spend_limit = self.authorization.spend_limit?;
        Some(Grant {
            granter: self.granter,
            grantee: self.grantee,
            spend_limit,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FeeAllowanceResponse {
    allowance: FeeGrant,
}

#[derive(Debug, Deserialize)]
struct FeeGrant {
    allowance: AllowanceBody,
}

/// Basic, periodic and allowed-msg allowances share this shape; the latter
/// two nest their limits under `basic` or `allowance`.
#[derive(Debug, Default, Deserialize)]
struct AllowanceBody {
    #[serde(default)]
    spend_limit: Vec<Coin>,
    #[serde(default)]
    basic: Option<Box<AllowanceBody>>,
    #[serde(default)]
    allowance: Option<Box<AllowanceBody>>,
}

impl AllowanceBody {
    fn into_spend_limit(self) -> Vec<Coin> {
        if !self.spend_limit.is_empty() {
            return self.spend_limit;
        }
        self.basic
            .or(self.allowance)
            .map(|nested| (*nested).into_spend_limit())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Option<Coin>,
}

#[derive(Debug, Deserialize)]
struct DeploymentsResponse {
    #[serde(default)]
    deployments: Vec<DeploymentEntry>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct DeploymentEntry {
    deployment: DeploymentInfo,
    escrow_account: EscrowAccount,
}

#[derive(Debug, Deserialize)]
struct DeploymentInfo {
    deployment_id: DeploymentId,
}

#[derive(Debug, Deserialize)]
struct DeploymentId {
    dseq: String,
}

#[derive(Debug, Deserialize)]
struct EscrowAccount {
    balance: Coin,
    #[serde(default)]
    funds: Option<Coin>,
    settled_at: String,
}

#[derive(Debug, Deserialize)]
struct LeasesResponse {
    #[serde(default)]
    leases: Vec<LeaseEntry>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct LeaseEntry {
    lease: LeaseInfo,
}

#[derive(Debug, Deserialize)]
struct LeaseInfo {
    lease_id: LeaseId,
    price: Coin,
}

#[derive(Debug, Deserialize)]
struct LeaseId {
    dseq: String,
}

#[derive(Debug, Deserialize)]
struct LatestBlockResponse {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// LCD client for grant, allowance, balance and deployment queries
pub struct LcdClient {
    client: Client,
    base_url: String,
    retry_base_delay: Duration,
    retry_max_elapsed: Duration,
}

impl LcdClient {
    /// Create a new LCD client from chain configuration
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.lcd_endpoint.trim_end_matches('/').to_string(),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            retry_max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
        })
    }

    /// GET a JSON document, retrying transient failures
    ///
    /// Returns `Ok(None)` when the endpoint answers 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let backoff = ExponentialBackoff {
            initial_interval: self.retry_base_delay,
            max_interval: self.retry_base_delay * 8,
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.get_json_once(path, query).await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("Retryable LCD error on {}: {}", path, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Rpc(format!("{} returned {}", path, status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedData(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| Error::Deserialization(format!("{}: {}", path, e)))?;

        Ok(Some(value))
    }

    fn required<T>(value: Option<T>, what: &str) -> Result<T> {
        value.ok_or_else(|| Error::NotFound(what.to_string()))
    }

    /// Sum of active lease prices per dseq, in `denom` only
    async fn lease_rates(&self, owner: &str) -> Result<HashMap<(String, String), f64>> {
        let mut rates = HashMap::new();
        let mut page_key: Option<String> = None;

        loop {
            let mut query = vec![
                ("filters.owner", owner.to_string()),
                ("filters.state", "active".to_string()),
                ("pagination.limit", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(key) = &page_key {
                query.push(("pagination.key", key.clone()));
            }

            let response: LeasesResponse = Self::required(
                self.get_json("/akash/market/v1beta4/leases/list", &query)
                    .await?,
                "leases",
            )?;

            for entry in response.leases {
                let price = parse_decimal(&entry.lease.price.amount)?;
                *rates
                    .entry((entry.lease.lease_id.dseq, entry.lease.price.denom))
                    .or_insert(0.0) += price;
            }

            page_key = next_page_key(response.pagination);
            if page_key.is_none() {
                break;
            }
        }

        Ok(rates)
    }
}

fn next_page_key(pagination: Option<Pagination>) -> Option<String> {
    pagination
        .and_then(|p| p.next_key)
        .filter(|key| !key.is_empty())
}

#[async_trait]
impl GrantSource for LcdClient {
    async fn list_grants(
        &self,
        grantee: &str,
        page_size: usize,
        page_key: Option<&str>,
    ) -> Result<GrantPage> {
        let mut query = vec![("pagination.limit", page_size.to_string())];
        if let Some(key) = page_key {
            query.push(("pagination.key", key.to_string()));
        }

        let path = format!("/cosmos/authz/v1beta1/grants/grantee/{}", grantee);
        let response: Option<GrantsResponse> = self.get_json(&path, &query).await?;
        let Some(response) = response else {
            return Ok(GrantPage::default());
        };

        let grants = response
            .grants
            .into_iter()
            .filter_map(GrantAuthorization::into_deployment_grant)
            .collect();

        Ok(GrantPage {
            grants,
            next_key: next_page_key(response.pagination),
        })
    }
}

#[async_trait]
impl FeeAllowanceSource for LcdClient {
    async fn fee_allowance(&self, granter: &str, grantee: &str) -> Result<FeeAllowance> {
        let path = format!(
            "/cosmos/feegrant/v1beta1/allowance/{}/{}",
            granter, grantee
        );
        let response: Option<FeeAllowanceResponse> = self.get_json(&path, &[]).await?;

        Ok(FeeAllowance {
            spend_limit: response
                .map(|r| r.allowance.allowance.into_spend_limit())
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl BalanceSource for LcdClient {
    async fn balance(&self, address: &str, denom: &str) -> Result<Coin> {
        let path = format!("/cosmos/bank/v1beta1/balances/{}/by_denom", address);
        let response: Option<BalanceResponse> = self
            .get_json(&path, &[("denom", denom.to_string())])
            .await?;

        Ok(response
            .and_then(|r| r.balance)
            .unwrap_or_else(|| Coin::new(denom, 0)))
    }
}

#[async_trait]
impl DeploymentSource for LcdClient {
    async fn active_deployments(&self, owner: &str) -> Result<Vec<DeploymentEscrow>> {
        let rates = self.lease_rates(owner).await?;
        let mut deployments = Vec::new();
        let mut page_key: Option<String> = None;

        loop {
            let mut query = vec![
                ("filters.owner", owner.to_string()),
                ("filters.state", "active".to_string()),
                ("pagination.limit", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(key) = &page_key {
                query.push(("pagination.key", key.clone()));
            }

            let response: DeploymentsResponse = Self::required(
                self.get_json("/akash/deployment/v1beta3/deployments/list", &query)
                    .await?,
                "deployments",
            )?;

            for entry in response.deployments {
                deployments.push(escrow_from_entry(entry, &rates)?);
            }

            page_key = next_page_key(response.pagination);
            if page_key.is_none() {
                break;
            }
        }

        Ok(deployments)
    }

    async fn latest_height(&self) -> Result<u64> {
        let response: LatestBlockResponse = Self::required(
            self.get_json("/cosmos/base/tendermint/v1beta1/blocks/latest", &[])
                .await?,
            "latest block",
        )?;

        response.block.header.height.parse().map_err(|e| {
            Error::UnexpectedData(format!(
                "Invalid block height {:?}: {}",
                response.block.header.height, e
            ))
        })
    }
}

fn escrow_from_entry(
    entry: DeploymentEntry,
    rates: &HashMap<(String, String), f64>,
) -> Result<DeploymentEscrow> {
    let dseq = entry.deployment.deployment_id.dseq;
    let escrow = entry.escrow_account;
    let denom = escrow.balance.denom.clone();

    let mut escrow_balance = parse_decimal(&escrow.balance.amount)?;
    if let Some(funds) = escrow.funds.filter(|f| f.denom == denom) {
        escrow_balance += parse_decimal(&funds.amount)?;
    }

    let settled_at: u64 = escrow.settled_at.parse().map_err(|e| {
        Error::UnexpectedData(format!(
            "Invalid settled_at {:?} for dseq {}: {}",
            escrow.settled_at, dseq, e
        ))
    })?;

    let block_rate = rates
        .get(&(dseq.clone(), denom.clone()))
        .copied()
        .unwrap_or(0.0);

    Ok(DeploymentEscrow {
        dseq,
        denom,
        escrow_balance,
        settled_at,
        block_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_response_keeps_only_deposit_grants() {
        let json = r#"{
            "grants": [
                {
                    "granter": "akash1owner",
                    "grantee": "akash1master",
                    "authorization": {
                        "@type": "/akash.deployment.v1beta3.DepositDeploymentAuthorization",
                        "spend_limit": { "denom": "uakt", "amount": "5000000" }
                    },
                    "expiration": "2027-01-01T00:00:00Z"
                },
                {
                    "granter": "akash1other",
                    "grantee": "akash1master",
                    "authorization": {
                        "@type": "/cosmos.authz.v1beta1.GenericAuthorization",
                        "msg": "/cosmos.bank.v1beta1.MsgSend"
                    }
                }
            ],
            "pagination": { "next_key": "AAE=", "total": "0" }
        }"#;

        let response: GrantsResponse = serde_json::from_str(json).unwrap();
        let next_key = next_page_key(response.pagination);
        let grants: Vec<Grant> = response
            .grants
            .into_iter()
            .filter_map(GrantAuthorization::into_deployment_grant)
            .collect();

        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].granter, "akash1owner");
        assert_eq!(grants[0].spend_limit, Coin::new("uakt", "5000000"));
        assert_eq!(next_key.as_deref(), Some("AAE="));
    }

    #[test]
    fn test_empty_next_key_ends_pagination() {
        let pagination = Pagination {
            next_key: Some(String::new()),
        };
        assert_eq!(next_page_key(Some(pagination)), None);
        assert_eq!(next_page_key(None), None);
    }

    #[test]
    fn test_fee_allowance_basic_and_nested() {
        let basic = r#"{
            "allowance": {
                "granter": "akash1owner",
                "grantee": "akash1master",
                "allowance": {
                    "@type": "/cosmos.feegrant.v1beta1.BasicAllowance",
                    "spend_limit": [{ "denom": "uakt", "amount": "20000" }],
                    "expiration": null
                }
            }
        }"#;
        let response: FeeAllowanceResponse = serde_json::from_str(basic).unwrap();
        assert_eq!(
            response.allowance.allowance.into_spend_limit(),
            vec![Coin::new("uakt", "20000")]
        );

        let nested = r#"{
            "allowance": {
                "granter": "akash1owner",
                "grantee": "akash1master",
                "allowance": {
                    "@type": "/cosmos.feegrant.v1beta1.AllowedMsgAllowance",
                    "allowance": {
                        "@type": "/cosmos.feegrant.v1beta1.PeriodicAllowance",
                        "basic": { "spend_limit": [{ "denom": "uakt", "amount": "7000" }] }
                    },
                    "allowed_messages": ["/cosmos.authz.v1beta1.MsgExec"]
                }
            }
        }"#;
        let response: FeeAllowanceResponse = serde_json::from_str(nested).unwrap();
        assert_eq!(
            response.allowance.allowance.into_spend_limit(),
            vec![Coin::new("uakt", "7000")]
        );
    }

    #[test]
    fn test_escrow_from_entry_sums_funds_and_lease_rate() {
        let json = r#"{
            "deployment": {
                "deployment_id": { "owner": "akash1owner", "dseq": "1234" },
                "state": "active"
            },
            "groups": [],
            "escrow_account": {
                "balance": { "denom": "uakt", "amount": "400000.000000000000000000" },
                "funds": { "denom": "uakt", "amount": "100000.000000000000000000" },
                "settled_at": "900",
                "state": "open"
            }
        }"#;
        let entry: DeploymentEntry = serde_json::from_str(json).unwrap();

        let mut rates = HashMap::new();
        rates.insert(("1234".to_string(), "uakt".to_string()), 12.5);

        let escrow = escrow_from_entry(entry, &rates).unwrap();
        assert_eq!(escrow.dseq, "1234");
        assert_eq!(escrow.denom, "uakt");
        assert_eq!(escrow.escrow_balance, 500_000.0);
        assert_eq!(escrow.settled_at, 900);
        assert_eq!(escrow.block_rate, 12.5);
    }

    #[test]
    fn test_latest_block_parses() {
        let json = r#"{ "block_id": {}, "block": { "header": { "height": "17000000" } } }"#;
        let response: LatestBlockResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.block.header.height, "17000000");
    }
}
