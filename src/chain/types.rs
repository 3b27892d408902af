//! Chain data types consumed by the reconciler
//!
//! Only the fields the top-up pipeline reads are modelled here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A denominated amount as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl ToString) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.to_string(),
        }
    }

    /// Amount in base units
    pub fn base_units(&self) -> Result<u128> {
        parse_base_units(&self.amount)
    }
}

/// Deployment spend grant from a deployment owner to a custodial master wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Deployment owner
    pub granter: String,
    /// Custodial master wallet
    pub grantee: String,
    /// Spend limit of the deposit authorization
    pub spend_limit: Coin,
}

impl Grant {
    pub fn denom(&self) -> &str {
        &self.spend_limit.denom
    }

    /// Remaining deployment spend allowance in base units
    pub fn deployment_limit(&self) -> Result<u128> {
        self.spend_limit.base_units()
    }
}

/// One page of grants plus the key of the next page, if any
#[derive(Debug, Clone, Default)]
pub struct GrantPage {
    pub grants: Vec<Grant>,
    pub next_key: Option<String>,
}

/// Fee allowance granted by a deployment owner to a master wallet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeAllowance {
    pub spend_limit: Vec<Coin>,
}

impl FeeAllowance {
    /// Remaining fee allowance for `denom`, zero when no entry exists
    pub fn remaining(&self, denom: &str) -> Result<u128> {
        match self.spend_limit.iter().find(|coin| coin.denom == denom) {
            Some(coin) => coin.base_units(),
            None => Ok(0),
        }
    }
}

/// Escrow state of one active deployment
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentEscrow {
    pub dseq: String,
    pub denom: String,
    /// Escrow balance plus deposited funds, in base units
    pub escrow_balance: f64,
    /// Block height the escrow was last settled at
    pub settled_at: u64,
    /// Spend per block across the deployment's active leases
    pub block_rate: f64,
}

/// Parse an on-chain integer amount
///
/// Cosmos coin amounts are unsigned integers written as plain digits. A
/// decimal rendering with an all-zero fractional part ("1000.000") is
/// accepted, anything else (signs included) is rejected.
pub fn parse_base_units(raw: &str) -> Result<u128> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| Error::InvalidAmount {
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole.is_empty() {
        return Err(invalid("empty amount"));
    }

    if !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("not an unsigned integer"));
    }

    if !fraction.chars().all(|c| c == '0') {
        return Err(invalid("fractional base units"));
    }

    whole
        .parse::<u128>()
        .map_err(|e| invalid(&e.to_string()))
}

/// Parse a decimal amount such as a per-block lease price
pub fn parse_decimal(raw: &str) -> Result<f64> {
    let value: f64 = raw.trim().parse().map_err(|e: std::num::ParseFloatError| {
        Error::InvalidAmount {
            value: raw.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidAmount {
            value: raw.to_string(),
            reason: "must be a finite non-negative number".to_string(),
        });
    }

    Ok(value)
}
