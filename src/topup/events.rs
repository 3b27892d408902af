//! Structured top-up events
//!
//! Every event carries enough context (granter, grantee, dseq, amounts) to
//! reconstruct what happened without a run-global sequence number.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::constraints::Limits;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum TopUpEvent {
    /// A deposit is about to be submitted
    TopUpDeployment {
        dseq: String,
        amount: u128,
        denom: String,
        owner: String,
        master_wallet: String,
    },
    /// The deposit transaction was accepted
    TopUpDeploymentSuccess {
        dseq: String,
        amount: u128,
        denom: String,
        owner: String,
        master_wallet: String,
        transaction_hash: String,
    },
    /// A grant ran out of capacity; its remaining deployments are skipped
    InsufficientBalance {
        granter: String,
        grantee: String,
        denom: String,
        balances: Limits,
    },
    /// Processing a grant failed
    TopUpError {
        granter: String,
        grantee: String,
        denom: String,
        error: String,
    },
}

impl TopUpEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TopUpEvent::TopUpDeployment { .. } => "TOP_UP_DEPLOYMENT",
            TopUpEvent::TopUpDeploymentSuccess { .. } => "TOP_UP_DEPLOYMENT_SUCCESS",
            TopUpEvent::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TopUpEvent::TopUpError { .. } => "TOP_UP_ERROR",
        }
    }
}

/// Consumer of the event stream
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TopUpEvent);
}

/// Writes events to the tracing subscriber as JSON payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: TopUpEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| format!("{:?} ({})", event, e));
        let name = event.name();

        match event {
            TopUpEvent::TopUpError { .. } => error!(event = name, "{}", payload),
            TopUpEvent::InsufficientBalance { .. } => warn!(event = name, "{}", payload),
            _ => info!(event = name, "{}", payload),
        }
    }
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<TopUpEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TopUpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: TopUpEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}
