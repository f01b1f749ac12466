//! # vigil - dead man's switch trigger runner
//!
//! Usage:
//!   vigil run                                  # scan every interval until Ctrl-C
//!   vigil once                                 # one cycle, print the report
//!   vigil plan                                 # list current candidates (read-only)
//!   vigil status                               # per-state account counts
//!   vigil enroll <id> --contact <c> --payload-ref <r>
//!   vigil checkin <id>                         # record owner activity

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vigil_core::domain::{AccountId, NewAccount};
use vigil_core::{Engine, EngineConfig};

#[derive(Parser)]
#[command(name = "vigil", version, about = "Dead man's switch trigger runner")]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run cycles at the configured interval until interrupted
    Run,
    /// Run a single cycle and print its report
    Once,
    /// Show accounts that would be picked up now, without claiming them
    Plan,
    /// Print account counts per trigger state
    Status,
    /// Enroll an account (starts Untriggered)
    Enroll {
        identity: String,
        /// Beneficiary address handed to the notifier
        #[arg(long)]
        contact: String,
        /// Opaque reference to the sealed payload
        #[arg(long)]
        payload_ref: String,
        /// Backdate the last activity by this many days
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(i64).range(0..=36500))]
        silent_days: i64,
    },
    /// Record owner activity now
    Checkin { identity: String },
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "vigil=debug,vigil_core=debug"
    } else {
        "vigil=info,vigil_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(true).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_ref())?;
    let engine = config
        .engine_builder()
        .context("failed to prepare engine")?
        .build()?;

    match cli.command {
        Command::Run => run(&engine).await?,
        Command::Once => {
            let report = engine.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Plan => {
            let candidates = engine.plan().await?;
            let rows: Vec<_> = candidates
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "identity": c.record.identity,
                        "reason": c.eligibility,
                        "state": c.record.trigger_state,
                        "last_activity": c.record.last_activity,
                        "delivery_attempts": c.record.delivery_attempts,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Status => {
            let counts = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::Enroll {
            identity,
            contact,
            payload_ref,
            silent_days,
        } => {
            let record = engine
                .enroll(NewAccount {
                    identity: AccountId::new(identity),
                    last_activity: Utc::now() - Duration::days(silent_days),
                    beneficiary_contact: contact,
                    payload_reference: payload_ref,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Checkin { identity } => {
            let identity = AccountId::new(identity);
            if !engine.check_in(&identity).await? {
                bail!("unknown account {identity}");
            }
            tracing::info!(account = %identity.redacted(), "check-in recorded");
        }
    }
    Ok(())
}

async fn run(engine: &Engine) -> Result<()> {
    tracing::info!(runner = %engine.runner_id(), "vigil runner starting");
    let scheduler = engine.spawn_scheduler();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested; waiting for the current cycle");

    let cycles = scheduler.shutdown_and_join().await;
    tracing::info!(cycles, "vigil runner stopped");
    Ok(())
}
