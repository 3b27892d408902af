//! Custodial wallet identities paired with their submission clients

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::signer::{HttpSigningClient, SigningClient};
use crate::config::{ChainConfig, WalletConfig};
use crate::error::{Error, Result};

/// A custodial master wallet held by the platform
#[async_trait]
pub trait CustodialWallet: Send + Sync {
    /// The funding (grantee) address of this wallet
    async fn first_address(&self) -> Result<String>;
}

/// Wallet whose address is known from configuration
///
/// Keys live with the signing service; the reconciler only needs the
/// address to look up grants.
#[derive(Debug, Clone)]
pub struct StaticWallet {
    address: String,
}

impl StaticWallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl CustodialWallet for StaticWallet {
    async fn first_address(&self) -> Result<String> {
        if self.address.is_empty() {
            return Err(Error::Wallet("Wallet has no address".to_string()));
        }
        Ok(self.address.clone())
    }
}

/// One custodial signing identity plus its transaction client
#[derive(Clone)]
pub struct WalletClientPair {
    pub name: String,
    pub wallet: Arc<dyn CustodialWallet>,
    pub client: Arc<dyn SigningClient>,
}

impl std::fmt::Debug for WalletClientPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletClientPair")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WalletClientPair {
    pub fn new(
        name: impl Into<String>,
        wallet: Arc<dyn CustodialWallet>,
        client: Arc<dyn SigningClient>,
    ) -> Self {
        Self {
            name: name.into(),
            wallet,
            client,
        }
    }

    /// Build all pairs from configuration
    pub fn from_config(wallets: &[WalletConfig], chain: &ChainConfig) -> Result<Vec<Self>> {
        let mut pairs = Vec::with_capacity(wallets.len());

        for wallet in wallets {
            let token = wallet.signer_token.clone().filter(|t| !t.is_empty());
            let client = HttpSigningClient::new(&wallet.signer_url, token, chain.timeout_ms)?;

            info!(
                "Loaded custodial wallet {}: {} (signer: {})",
                wallet.name, wallet.address, wallet.signer_url
            );

            pairs.push(Self::new(
                wallet.name.clone(),
                Arc::new(StaticWallet::new(wallet.address.clone())),
                Arc::new(client),
            ));
        }

        Ok(pairs)
    }
}
