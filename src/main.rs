//! Deployment Top-Up - keeps custodial deployments funded
//!
//! # WARNING
//! - Every top-up spends the owner's funds through their deployment grant.
//! - Run a single pass (`topup run`) against a new configuration before
//!   scheduling it with `topup watch`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

// Use the library crate
use deployment_topup::cli::commands;
use deployment_topup::config::Config;

/// Deployment Top-Up - custodial escrow reconciler
#[derive(Parser)]
#[command(name = "topup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single reconciliation pass
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run reconciliation periodically until interrupted
    Watch {
        /// Seconds between runs (default: schedule.interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("deployment_topup=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded configuration with {} wallet(s)", config.wallets.len());

    // Execute command
    let result = match cli.command {
        Commands::Run { json } => commands::run_once(&config, json).await,
        Commands::Watch { interval_secs } => commands::watch(&config, interval_secs).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
