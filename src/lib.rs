//! Custodial Deployment Top-Up Library
//!
//! Keeps custodial deployments funded by depositing into draining escrows
//! through the deployment grants their owners gave the master wallets.

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod topup;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use topup::ReconciliationEngine;
