use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

mod config;
mod database;
mod error;
mod metrics;
mod monitoring;
mod orchestrator;
mod pool;

use config::Config;
use monitoring::parser::parse_report;
use monitoring::validation::{validate_check_interval, validate_destination, validate_probe_count, validate_timeout};
use monitoring::{DiagnosticExecutor, MtrExecutor};
use orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "tracewatch", version)]
#[command(about = "Watches network paths with mtr and records route changes, latency and loss")]
struct Args {
    /// Path to the config file (defaults to ~/.config/tracewatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the retention sweeper until Ctrl-C
    Run,
    /// Run one diagnostic against a destination without storing anything
    Check { destination: String },
    /// List monitored hosts
    Hosts,
    /// Show a host with its current route and recent history
    Show { destination: String },
    /// Print the latency and loss series of a host
    Metrics {
        destination: String,
        /// RFC 3339 lower bound
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// Add a host and check it right away
    Add {
        destination: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short = 'g', long)]
        category: Option<String>,
    },
    /// Remove a host with its history and metrics
    Remove { destination: String },
    /// List categories
    Categories,
    AddCategory { name: String },
    /// Remove a category, moving its hosts to the default category
    RemoveCategory { name: String },
    /// Purge history and metrics past the retention horizon
    Sweep,
    /// Import a seed list (defaults to the configured seed file)
    Import { file: Option<PathBuf> },
    /// Print the effective configuration
    Config,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    validate_check_interval(config.monitoring.interval_seconds)?;
    validate_timeout(config.monitoring.timeout_seconds)?;
    validate_probe_count(config.monitoring.probe_count)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::from_config(args.config.as_ref()).context("failed to load configuration")?;

    let format = config.logging.format.parse().unwrap_or_else(|e| {
        eprintln!("{e}, falling back to compact output");
        logger::LogFormat::Compact
    });
    logger::init(format, &config.logging.level);

    validate_config(&config)?;

    match args.command {
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Check { destination } => check_once(&config, &destination).await,
        Command::Run => run(config).await,
        command => {
            let orchestrator = Orchestrator::open(config).await?;
            let result = execute(&orchestrator, command).await;
            orchestrator.shutdown().await;
            result
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let seed_file = config.hosts.seed_file.clone();
    let mut orchestrator = Orchestrator::open(config).await?;

    if let Some(path) = seed_file {
        match orchestrator.import_seed_file(&path).await {
            Ok(summary) => info!(
                imported = summary.imported,
                existing = summary.existing,
                invalid = summary.invalid,
                "Seed list processed"
            ),
            Err(e) => warn!("Seed import from {} failed: {}", path.display(), e),
        }
    }

    orchestrator.start();
    info!("tracewatch running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    if let Some(at) = orchestrator.last_cycle_timestamp() {
        info!("Last check cycle finished at {}", at);
    }
    orchestrator.shutdown().await;
    Ok(())
}

async fn check_once(config: &Config, destination: &str) -> Result<()> {
    validate_destination(destination).with_context(|| format!("invalid destination '{destination}'"))?;

    let executor = MtrExecutor::new(
        config.monitoring.mtr_path.clone(),
        config.monitoring.probe_count,
        config.monitoring.timeout_seconds,
    );
    let raw = executor.run(destination).await?;
    print_json(&parse_report(&raw.stdout))
}

async fn execute(orchestrator: &Orchestrator, command: Command) -> Result<()> {
    match command {
        Command::Hosts => print_json(&orchestrator.list_hosts().await?),
        Command::Show { destination } => print_json(&orchestrator.get_host(&destination).await?),
        Command::Metrics { destination, start, end } => {
            print_json(&orchestrator.get_metrics(&destination, start, end).await?)
        }
        Command::Add { destination, title, category } => {
            let host = orchestrator.add_host(&destination, title.as_deref(), category.as_deref()).await?;
            orchestrator.wait_for_pending_checks().await;
            print_json(&host)
        }
        Command::Remove { destination } => {
            orchestrator.delete_host(&destination).await?;
            Ok(())
        }
        Command::Categories => print_json(&orchestrator.list_categories().await?),
        Command::AddCategory { name } => Ok(orchestrator.add_category(&name).await?),
        Command::RemoveCategory { name } => Ok(orchestrator.delete_category(&name).await?),
        Command::Sweep => print_json(&orchestrator.retention_sweeper().sweep().await?),
        Command::Import { file } => {
            let path = file.or_else(|| orchestrator.config().hosts.seed_file.clone());
            let Some(path) = path else {
                warn!("No seed file configured");
                return Ok(());
            };
            let summary = orchestrator.import_seed_file(&path).await?;
            orchestrator.wait_for_pending_checks().await;
            print_json(&summary)
        }
        Command::Run | Command::Check { .. } | Command::Config => Ok(()),
    }
}
