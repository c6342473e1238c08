//! Entitle command-line host
//!
//! Runs the license engine against a local SQLite store and the configured
//! authority, performs one operation, and prints the result as JSON.
//!
//! Usage:
//!   entitle status
//!   entitle activate PRO-1234 user@example.com
//!   entitle feature reports --offline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use entitle_cli::{CliConfig, Host, StatusReport};
use entitle_sync::OperationResult;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "entitle")]
#[command(about = "Inspect and manage the local license entitlement")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the license store (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Authority endpoint URL (overrides the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Behave as if the device had no connectivity
    #[arg(long, global = true)]
    offline: bool,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the resident license
    Status,
    /// Activate a license code for an email
    Activate { code: String, email: String },
    /// Force a check with the authority
    Refresh,
    /// Remove the license and sign out
    Clear,
    /// Report whether a feature is enabled
    Feature { key: String },
    /// Report a limit value
    Limit { name: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = CliConfig::load(args.config.as_deref())?
        .with_overrides(args.store, args.endpoint);
    let host = Host::open(&config, !args.offline)?;
    let phase = host.engine.start().await;
    debug!("Engine started in phase {phase}");

    let success = match args.command {
        Command::Status => print_json(&StatusReport::collect(&host)?)?,
        Command::Activate { code, email } => {
            report(host.engine.validate_license(&code, &email).await)?
        }
        Command::Refresh => report(host.engine.refresh_license().await)?,
        Command::Clear => report(host.engine.clear_license().await)?,
        Command::Feature { key } => {
            let enabled = host.engine.has_feature(&key);
            print_json(&json!({ "feature": key, "enabled": enabled }))?
        }
        Command::Limit { name } => {
            let value = host.engine.get_limit_value(&name);
            print_json(&json!({ "limit": name, "value": value }))?
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report(result: OperationResult) -> Result<bool> {
    print_json(&result)?;
    Ok(result.success)
}

fn print_json(value: &impl Serialize) -> Result<bool> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{out}");
    Ok(true)
}
