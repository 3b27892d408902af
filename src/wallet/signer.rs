//! Transaction submission for custodial master wallets
//!
//! Signing happens in the platform's signing service; this crate only hands
//! it encoded messages and waits for the transaction hash.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A message ready for inclusion in a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedMessage {
    pub type_url: String,
    pub value: serde_json::Value,
}

/// Outcome of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: String,
}

/// Signs and broadcasts transactions for one master wallet
#[async_trait]
pub trait SigningClient: Send + Sync {
    /// Submit `messages` as a single transaction
    async fn execute_tx(&self, messages: Vec<EncodedMessage>) -> Result<TxReceipt>;
}

#[derive(Debug, Serialize)]
struct ExecuteTxRequest<'a> {
    messages: &'a [EncodedMessage],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteTxResponse {
    transaction_hash: Option<String>,
    error: Option<String>,
}

/// Signing client backed by the HTTP signing service
pub struct HttpSigningClient {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpSigningClient {
    /// Create a client for the signing service at `base_url`
    pub fn new(base_url: &str, token: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/v1/tx", base_url.trim_end_matches('/')),
            token,
        })
    }
}

#[async_trait]
impl SigningClient for HttpSigningClient {
    async fn execute_tx(&self, messages: Vec<EncodedMessage>) -> Result<TxReceipt> {
        if messages.is_empty() {
            return Err(Error::TransactionBuild("Empty transaction".to_string()));
        }

        debug!("Submitting transaction with {} message(s)", messages.len());

        let mut request = self
            .client
            .post(&self.url)
            .json(&ExecuteTxRequest {
                messages: &messages,
            });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::TransactionSend(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body: ExecuteTxResponse = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = body.error {
            return Err(Error::TransactionSend(error));
        }

        if !status.is_success() {
            return Err(Error::TransactionSend(format!(
                "Signing service returned {}",
                status
            )));
        }

        let transaction_hash = body.transaction_hash.ok_or_else(|| {
            Error::TransactionSend("Signing service returned no transaction hash".to_string())
        })?;

        info!("Transaction submitted: {}", transaction_hash);

        Ok(TxReceipt { transaction_hash })
    }
}
