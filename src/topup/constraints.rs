//! Spend constraints for custodial top-ups
//!
//! A top-up must fit inside three independent limits at once: the
//! deployment spend grant, the fee allowance, and the granter's balance.
//! The snapshot is read once per grant and only ever decreases by local
//! arithmetic afterwards; it is never re-read mid-pass.

use serde::Serialize;

/// Remaining capacity for one grant, in base units of `denom`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub denom: String,
    /// Remaining fee allowance for this granter/grantee/denom
    pub fees_limit: u128,
    /// Remaining deployment spend allowance from the grant
    pub deployment_limit: u128,
    /// On-chain balance of the granter
    pub balance: u128,
}

/// The three limits without the denom, as reported in events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub deployment_limit: u128,
    pub fees_limit: u128,
    pub balance: u128,
}

impl BalanceSnapshot {
    pub fn limits(&self) -> Limits {
        Limits {
            deployment_limit: self.deployment_limit,
            fees_limit: self.fees_limit,
            balance: self.balance,
        }
    }
}

/// Affordability checks against a [`BalanceSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintEngine {
    fee_reserve: u128,
}

impl ConstraintEngine {
    /// `fee_reserve` is the minimum fee budget each top-up transaction consumes
    pub fn new(fee_reserve: u128) -> Self {
        Self { fee_reserve }
    }

    pub fn fee_reserve(&self) -> u128 {
        self.fee_reserve
    }

    /// Whether `amount` fits strictly inside all three limits
    ///
    /// Every comparison is strict: a limit exactly equal to what is needed
    /// is insufficient.
    pub fn can_top_up(&self, amount: u128, snapshot: &BalanceSnapshot) -> bool {
        let Some(total) = amount.checked_add(self.fee_reserve) else {
            return false;
        };

        snapshot.deployment_limit > amount
            && snapshot.fees_limit > self.fee_reserve
            && snapshot.balance > total
    }

    /// Deduct an accepted top-up from the snapshot
    ///
    /// Only valid after [`can_top_up`](Self::can_top_up) returned true for
    /// the same amount and snapshot; saturates otherwise.
    pub fn deduct(&self, amount: u128, snapshot: &BalanceSnapshot) -> BalanceSnapshot {
        BalanceSnapshot {
            denom: snapshot.denom.clone(),
            deployment_limit: snapshot.deployment_limit.saturating_sub(amount),
            fees_limit: snapshot.fees_limit.saturating_sub(self.fee_reserve),
            balance: snapshot
                .balance
                .saturating_sub(amount.saturating_add(self.fee_reserve)),
        }
    }

    /// Check and deduct in one step
    ///
    /// Returns the reduced snapshot, or `None` when the amount is not
    /// affordable.
    pub fn try_reserve(&self, amount: u128, snapshot: &BalanceSnapshot) -> Option<BalanceSnapshot> {
        self.can_top_up(amount, snapshot)
            .then(|| self.deduct(amount, snapshot))
    }
}
