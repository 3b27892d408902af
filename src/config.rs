//! Configuration loading and validation

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub draining: DrainingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Cosmos LCD (REST) endpoint
    #[serde(default = "default_lcd_endpoint")]
    pub lcd_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Give up retrying a query after this long
    #[serde(default = "default_retry_max_elapsed_ms")]
    pub retry_max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Grants processed concurrently per wallet; also the grant page size
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Fee allowance reserved per top-up transaction, in base units
    #[serde(default = "default_fee_reserve")]
    pub fee_reserve: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrainingConfig {
    #[serde(default = "default_average_block_time_secs")]
    pub average_block_time_secs: f64,
    /// Deployments with less runway than this are topped up
    #[serde(default = "default_runway_threshold_hours")]
    pub runway_threshold_hours: f64,
    /// Each top-up buys this much additional runway
    #[serde(default = "default_top_up_window_hours")]
    pub top_up_window_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between reconciliation runs in watch mode
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// A custodial master wallet and the service that signs for it
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub name: String,
    pub address: String,
    pub signer_url: String,
    #[serde(default)]
    pub signer_token: Option<String>,
}

fn default_lcd_endpoint() -> String {
    "https://api.akashnet.net".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_elapsed_ms() -> u64 {
    5_000
}

fn default_concurrency() -> usize {
    10
}

fn default_fee_reserve() -> u64 {
    5000
}

fn default_average_block_time_secs() -> f64 {
    6.098
}

fn default_runway_threshold_hours() -> f64 {
    24.0
}

fn default_top_up_window_hours() -> f64 {
    72.0
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            lcd_endpoint: default_lcd_endpoint(),
            timeout_ms: default_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_elapsed_ms: default_retry_max_elapsed_ms(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fee_reserve: default_fee_reserve(),
        }
    }
}

impl Default for DrainingConfig {
    fn default() -> Self {
        Self {
            average_block_time_secs: default_average_block_time_secs(),
            runway_threshold_hours: default_runway_threshold_hours(),
            top_up_window_hours: default_top_up_window_hours(),
        }
    }
}

impl DrainingConfig {
    /// Convert hours of runway into blocks at the average block time
    pub fn hours_to_blocks(&self, hours: f64) -> u64 {
        (hours * 3600.0 / self.average_block_time_secs).floor() as u64
    }

    pub fn runway_threshold_blocks(&self) -> u64 {
        self.hours_to_blocks(self.runway_threshold_hours)
    }

    pub fn top_up_window_blocks(&self) -> u64 {
        self.hours_to_blocks(self.top_up_window_hours)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("chain.lcd_endpoint", default_lcd_endpoint())?
            .set_default("chain.timeout_ms", default_timeout_ms() as i64)?
            .set_default("reconciliation.concurrency", default_concurrency() as i64)?
            .set_default("reconciliation.fee_reserve", default_fee_reserve() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TOPUP_)
            .add_source(
                config::Environment::with_prefix("TOPUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        validate_url("chain.lcd_endpoint", &self.chain.lcd_endpoint)?;

        if self.chain.timeout_ms == 0 {
            anyhow::bail!("chain.timeout_ms must be positive");
        }

        if self.reconciliation.concurrency == 0 {
            anyhow::bail!("reconciliation.concurrency must be at least 1");
        }

        if self.reconciliation.fee_reserve == 0 {
            anyhow::bail!("reconciliation.fee_reserve must be positive");
        }

        if self.draining.average_block_time_secs <= 0.0 {
            anyhow::bail!("draining.average_block_time_secs must be positive");
        }

        if self.draining.runway_threshold_hours <= 0.0 {
            anyhow::bail!("draining.runway_threshold_hours must be positive");
        }

        if self.draining.top_up_window_hours <= 0.0 {
            anyhow::bail!("draining.top_up_window_hours must be positive");
        }

        if self.schedule.interval_secs == 0 {
            anyhow::bail!("schedule.interval_secs must be positive");
        }

        // Bech32 shape: human-readable prefix, separator, data part
        let address_re = Regex::new(r"^[a-z]{1,83}1[02-9ac-hj-np-z]{38,58}$")
            .context("Invalid address pattern")?;

        let mut names = HashSet::new();
        for wallet in &self.wallets {
            if wallet.name.is_empty() {
                anyhow::bail!("Wallet name cannot be empty");
            }
            if !names.insert(wallet.name.as_str()) {
                anyhow::bail!("Duplicate wallet name: {}", wallet.name);
            }
            if !address_re.is_match(&wallet.address) {
                anyhow::bail!("Invalid wallet address for {}: {}", wallet.name, wallet.address);
            }
            validate_url(&format!("wallets.{}.signer_url", wallet.name), &wallet.signer_url)?;
        }

        if self.wallets.is_empty() {
            tracing::warn!("No custodial wallets configured - reconciliation runs will fail");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let mut out = format!(
            r#"Configuration:
  Chain:
    lcd_endpoint: {}
    timeout: {}ms
    retry: {}ms base, {}ms max
  Reconciliation:
    concurrency: {}
    fee_reserve: {}
  Draining:
    average_block_time: {}s
    runway_threshold: {}h ({} blocks)
    top_up_window: {}h ({} blocks)
  Schedule:
    interval: {}s
  Wallets:
"#,
            mask_url(&self.chain.lcd_endpoint),
            self.chain.timeout_ms,
            self.chain.retry_base_delay_ms,
            self.chain.retry_max_elapsed_ms,
            self.reconciliation.concurrency,
            self.reconciliation.fee_reserve,
            self.draining.average_block_time_secs,
            self.draining.runway_threshold_hours,
            self.draining.runway_threshold_blocks(),
            self.draining.top_up_window_hours,
            self.draining.top_up_window_blocks(),
            self.schedule.interval_secs,
        );

        for wallet in &self.wallets {
            out.push_str(&format!(
                "    {}: {} via {} (token: {})\n",
                wallet.name,
                wallet.address,
                mask_url(&wallet.signer_url),
                match wallet.signer_token.as_deref() {
                    Some(token) if !token.is_empty() => "***",
                    _ => "(not set)",
                }
            ));
        }

        out
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let parsed =
        url::Url::parse(value).with_context(|| format!("Invalid URL for {}: {}", field, value))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must be an http(s) URL, got {}", field, value);
    }
    Ok(())
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            draining: DrainingConfig::default(),
            schedule: ScheduleConfig::default(),
            wallets: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MASTER: &str = "akash1qqqsyqcyq5rqwzqfpg9scrgwpugpzysn7hsd0x";

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.reconciliation.concurrency, 10);
        assert_eq!(config.reconciliation.fee_reserve, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hours_to_blocks() {
        let draining = DrainingConfig {
            average_block_time_secs: 6.0,
            runway_threshold_hours: 24.0,
            top_up_window_hours: 1.0,
        };
        assert_eq!(draining.runway_threshold_blocks(), 14_400);
        assert_eq!(draining.top_up_window_blocks(), 600);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(&format!(
            r#"
[reconciliation]
concurrency = 4
fee_reserve = 7500

[[wallets]]
name = "primary"
address = "{}"
signer_url = "http://signer:3000"
signer_token = "secret"
"#,
            MASTER
        ));

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.reconciliation.concurrency, 4);
        assert_eq!(config.reconciliation.fee_reserve, 7500);
        assert_eq!(config.wallets.len(), 1);
        assert_eq!(config.wallets[0].address, MASTER);

        let display = config.masked_display();
        assert!(display.contains("primary"));
        assert!(!display.contains("secret"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(
            r#"
[schedule]
interval_secs = 60
"#,
        );

        std::env::set_var("TOPUP__SCHEDULE__INTERVAL_SECS", "900");
        std::env::set_var("TOPUP__CHAIN__LCD_ENDPOINT", "https://lcd.example.org");
        let config = Config::load(file.path());
        std::env::remove_var("TOPUP__SCHEDULE__INTERVAL_SECS");
        std::env::remove_var("TOPUP__CHAIN__LCD_ENDPOINT");

        let config = config.unwrap();
        assert_eq!(config.schedule.interval_secs, 900);
        assert_eq!(config.chain.lcd_endpoint, "https://lcd.example.org");
    }

    #[test]
    fn test_rejects_invalid_wallet_address() {
        let mut config = Config::default();
        config.wallets.push(WalletConfig {
            name: "bad".to_string(),
            address: "not-an-address".to_string(),
            signer_url: "http://signer:3000".to_string(),
            signer_token: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_wallet_names() {
        let wallet = WalletConfig {
            name: "primary".to_string(),
            address: MASTER.to_string(),
            signer_url: "http://signer:3000".to_string(),
            signer_token: None,
        };
        let mut config = Config::default();
        config.wallets = vec![wallet.clone(), wallet];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.reconciliation.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_http_signer() {
        let mut config = Config::default();
        config.wallets.push(WalletConfig {
            name: "primary".to_string(),
            address: MASTER.to_string(),
            signer_url: "ftp://signer".to_string(),
            signer_token: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
