//! Chain access
//!
//! Grants, fee allowances, balances and deployment escrow state, behind
//! async traits so the reconciler can be driven by the LCD client in
//! production and by in-memory doubles in tests.

pub mod lcd;
pub mod sources;
pub mod types;

pub use lcd::LcdClient;
pub use sources::{BalanceSource, DeploymentSource, FeeAllowanceSource, GrantSource};
pub use types::{Coin, DeploymentEscrow, FeeAllowance, Grant, GrantPage};
