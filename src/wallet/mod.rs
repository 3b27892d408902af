//! Custodial wallet management
//!
//! Each configured master wallet is paired with the client that submits its
//! transactions. Keys never enter this process.
//!
//! ```text
//! WalletConfig → WalletClientPair { CustodialWallet, SigningClient }
//! ```

pub mod pair;
pub mod signer;

pub use pair::{CustodialWallet, StaticWallet, WalletClientPair};
pub use signer::{EncodedMessage, HttpSigningClient, SigningClient, TxReceipt};
