//! Deposit execution for a single draining deployment
//!
//! The master wallet deposits into the owner's deployment escrow on the
//! owner's behalf, authorized by the deployment grant. The deposit message is
//! wrapped in an authz `MsgExec` and submitted as one transaction. Failures
//! are returned to the caller as-is; nothing is retried here.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::events::{EventSink, TopUpEvent};
use crate::chain::Coin;
use crate::error::Result;
use crate::wallet::{EncodedMessage, SigningClient, TxReceipt};

pub const MSG_EXEC_TYPE_URL: &str = "/cosmos.authz.v1beta1.MsgExec";
pub const MSG_DEPOSIT_DEPLOYMENT_TYPE_URL: &str = "/akash.deployment.v1beta3.MsgDepositDeployment";

/// Everything needed to fund one deployment from one grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRequest {
    pub dseq: String,
    pub amount: u128,
    pub denom: String,
    /// Deployment owner and granter
    pub owner: String,
    /// Master wallet spending the grant
    pub grantee: String,
}

impl DepositRequest {
    /// Build the authz-wrapped deposit message
    pub fn to_message(&self) -> EncodedMessage {
        let deposit = EncodedMessage {
            type_url: MSG_DEPOSIT_DEPLOYMENT_TYPE_URL.to_string(),
            value: json!({
                "id": {
                    "owner": self.owner,
                    "dseq": self.dseq,
                },
                "amount": Coin::new(self.denom.clone(), self.amount),
                "depositor": self.grantee,
            }),
        };

        EncodedMessage {
            type_url: MSG_EXEC_TYPE_URL.to_string(),
            value: json!({
                "grantee": self.grantee,
                "msgs": [deposit],
            }),
        }
    }
}

/// Submits deposits and reports them on the event stream
pub struct TopUpExecutor {
    events: Arc<dyn EventSink>,
}

impl TopUpExecutor {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// Submit one deposit transaction through `client`
    pub async fn execute(
        &self,
        request: &DepositRequest,
        client: &dyn SigningClient,
    ) -> Result<TxReceipt> {
        let message = request.to_message();

        self.events.emit(TopUpEvent::TopUpDeployment {
            dseq: request.dseq.clone(),
            amount: request.amount,
            denom: request.denom.clone(),
            owner: request.owner.clone(),
            master_wallet: request.grantee.clone(),
        });

        let receipt = client.execute_tx(vec![message]).await?;

        debug!(
            "Deposited {}{} into {}/{} (tx: {})",
            request.amount, request.denom, request.owner, request.dseq, receipt.transaction_hash
        );

        self.events.emit(TopUpEvent::TopUpDeploymentSuccess {
            dseq: request.dseq.clone(),
            amount: request.amount,
            denom: request.denom.clone(),
            owner: request.owner.clone(),
            master_wallet: request.grantee.clone(),
            transaction_hash: receipt.transaction_hash.clone(),
        });

        Ok(receipt)
    }
}
