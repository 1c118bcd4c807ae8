//! Household ledger maintenance tool
//!
//! # Usage
//!
//! ```bash
//! # Apply pending migrations
//! ledger-maintenance migrate
//!
//! # Generate recurring bills due today and print the settle-up report
//! ledger-maintenance run
//!
//! # Catch up as of a given date, as JSON
//! ledger-maintenance run --today 2026-03-01 --json
//!
//! # Net debts that pass through a shared room or group
//! ledger-maintenance compensate-groups
//! ```
//!
//! Configuration comes from `ledger.toml` and `LEDGER_*` environment
//! variables, e.g. `LEDGER_DATABASE__URL=postgres://...`.

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use core_kernel::AdapterHealth;
use ledger_runtime::{connect, init_tracing, spawn_event_logger, LedgerConfig};

#[derive(Parser, Debug)]
#[command(name = "ledger-maintenance")]
#[command(about = "Maintenance tasks for the household ledger")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, env = "LEDGER_CONFIG", default_value = "ledger")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Generate due recurring bills and report outstanding loans
    Run {
        /// Date to generate up to (defaults to today, UTC)
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Net loan chains that pass through a group
    CompensateGroups {
        #[arg(long)]
        json: bool,
    },
    /// Report outstanding loans only
    SettleUp {
        #[arg(long)]
        json: bool,
    },
    /// Check database connectivity
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = LedgerConfig::load_from(&cli.config).context("loading configuration")?;
    init_tracing(&config.logging).context("initialising tracing")?;

    let (ledger, events) = connect(&config).await.context("connecting to the ledger database")?;
    let event_log = spawn_event_logger(events);

    match cli.command {
        Command::Migrate => {
            tracing::info!("Migrations applied");
        }
        Command::Run { today, json } => {
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let report = ledger.run_maintenance(today).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
        }
        Command::CompensateGroups { json } => {
            let result = ledger.compensate_groups().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Compensations: {} totalling {}",
                    result.compensations.len(),
                    result.total
                );
            }
        }
        Command::SettleUp { json } => {
            let summary = ledger.loans.get_all_balances(&ledger.request()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if summary.balances.is_empty() {
                println!("All loans settled");
            } else {
                for pair in &summary.balances {
                    println!("{} owes {} {}", pair.debtor, pair.creditor, pair.amount);
                }
            }
        }
        Command::Health => {
            let health = ledger.health().await;
            println!("{}: {:?} ({}ms)", health.adapter_id, health.status, health.latency_ms);
            if health.status != AdapterHealth::Healthy {
                bail!(
                    "ledger store unhealthy: {}",
                    health.message.unwrap_or_default()
                );
            }
        }
    }

    // close the event channel so the logger task finishes
    drop(ledger);
    let logged = event_log.await.context("event logger task failed")?;
    tracing::debug!(events = logged, "Event log drained");
    Ok(())
}
