//! CLI command implementations

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::topup::{GrantStatus, ReconciliationEngine, RunReport, Scheduler, TracingEventSink};

fn build_engine(config: &Config) -> Result<ReconciliationEngine> {
    info!("Connecting to LCD endpoint {}", config.chain.lcd_endpoint);
    ReconciliationEngine::from_config(config, Arc::new(TracingEventSink))
        .context("Failed to initialize reconciliation engine")
}

/// Run a single reconciliation pass
pub async fn run_once(config: &Config, json: bool) -> Result<()> {
    let engine = build_engine(config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight grants...");
            shutdown.cancel();
        }
    });

    let report = engine.run_until_cancelled(&cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Run reconciliation on a fixed interval until interrupted
pub async fn watch(config: &Config, interval_secs: Option<u64>) -> Result<()> {
    let interval = Duration::from_secs(interval_secs.unwrap_or(config.schedule.interval_secs));
    if interval.is_zero() {
        anyhow::bail!("Interval must be positive");
    }

    let engine = Arc::new(build_engine(config)?);
    let scheduler = Scheduler::new(engine, interval);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping scheduler...");
            shutdown.cancel();
        }
    });

    let runs = scheduler.run(cancel).await;
    info!("Stopped after {} run(s)", runs);

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n=== RECONCILIATION REPORT ===\n");
    println!("Run: {}", report.run_id);
    println!(
        "Duration: {}ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );
    println!("Grants processed: {}", report.grants_processed());
    println!("Top-ups: {}", report.top_ups());
    println!("Insufficient balance: {}", report.insufficient_grants());
    println!("Failed: {}", report.failed_grants());
    if report.was_cancelled() {
        println!("Run was cancelled before completion");
    }

    for pair in &report.pairs {
        println!(
            "\n--- {} ({}) ---",
            pair.name,
            pair.address.as_deref().unwrap_or("unknown address")
        );
        if let Some(error) = &pair.error {
            println!("  ERROR: {}", error);
        }
        for outcome in &pair.outcomes {
            let detail = match &outcome.status {
                GrantStatus::Completed { topped_up, .. } => format!("ok, {} top-up(s)", topped_up),
                GrantStatus::InsufficientBalance { topped_up, remaining } => format!(
                    "insufficient after {} top-up(s) (deployment {}, fees {}, balance {})",
                    topped_up, remaining.deployment_limit, remaining.fees_limit, remaining.balance
                ),
                GrantStatus::Failed { topped_up, error } => {
                    format!("FAILED after {} top-up(s): {}", topped_up, error)
                }
            };
            println!("  {} [{}]: {}", outcome.granter, outcome.denom, detail);
        }
    }
    println!();
}
