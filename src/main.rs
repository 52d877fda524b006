use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use freshness_agent::config::{self, AgentConfig, LogFormat};
use freshness_agent::events::{self, GeneratorRequest};
use freshness_agent::locator::{ArtifactLocator, LocatorError};
use freshness_agent::orchestrator::CycleExit;
use freshness_agent::{objstore, storage};

#[derive(Parser)]
#[command(
    name = "freshness-agent",
    about = "Check warehouse freshness and remediate stale data",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Log output format; overrides the config file
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one freshness check and, if stale, the remediation pipeline
    Run,

    /// Generate one synthetic event artifact
    Generate {
        /// Partition date (YYYY-MM-DD); defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of events
        #[arg(long)]
        count: Option<usize>,

        /// Source version tag written on every event
        #[arg(long)]
        source_version: Option<String>,

        /// Attach campaign ids to some events
        #[arg(long)]
        allow_campaign: bool,

        /// RNG seed for a reproducible batch
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Load one artifact into the raw events table
    Load {
        /// Artifact key, e.g. events/dt=2026-01-27/events_2026-01-27.jsonl
        #[arg(long)]
        key: String,
    },

    /// Print the most recent artifact key
    LatestKey {
        /// Key prefix; defaults to the configured one
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Show recent run records
    History {
        /// Number of records
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match AgentConfig::resolve(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing("info", cli.log_format.unwrap_or(LogFormat::Text));
            tracing::error!(error = %format!("{e:#}"), "Configuration error");
            eprintln!("Error: {e:#}");
            std::process::exit(CycleExit::ConfigurationError.code());
        }
    };
    init_tracing(&cfg.logging.level, cli.log_format.unwrap_or(cfg.logging.format));

    let code = match execute(cli.command, cfg, cli.config.as_deref()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn execute(command: Commands, mut cfg: AgentConfig, config_path: Option<&Path>) -> Result<i32> {
    match command {
        Commands::Run => {
            if let Some(path) = config_path {
                let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
                cfg.stages.export_config_path(&path);
            }
            let outcome = freshness_agent::run_cycle(&cfg).await;
            println!("{}", outcome.report);
            tracing::info!(
                cycle_id = %outcome.cycle_id,
                status = %outcome.status,
                exit_code = outcome.exit_code(),
                recorded = outcome.recorded,
                "Cycle finished"
            );
            Ok(outcome.exit_code())
        }
        Commands::Generate {
            date,
            count,
            source_version,
            allow_campaign,
            seed,
        } => {
            let mut generator = cfg.generator.clone();
            if let Some(count) = count {
                generator.count = count;
            }
            if let Some(tag) = source_version {
                generator.source_version = tag;
            }
            generator.allow_campaign |= allow_campaign;
            if seed.is_some() {
                generator.seed = seed;
            }
            let request = GeneratorRequest {
                config: generator,
                date: date.unwrap_or_else(|| chrono::Utc::now().date_naive()),
            };

            let store = objstore::open(&cfg.storage).context("failed to open object store")?;
            let key = events::generate_artifact(store.as_ref(), &cfg.artifacts.prefix, &request).await?;
            tracing::info!(%key, "Generation complete");
            Ok(0)
        }
        Commands::Load { key } => {
            let store = objstore::open(&cfg.storage).context("failed to open object store")?;
            let warehouse = storage::open(&cfg.warehouse).context("failed to open warehouse")?;
            events::load_artifact(store.as_ref(), warehouse.events.as_ref(), &key).await?;
            Ok(0)
        }
        Commands::LatestKey { prefix } => {
            let store = objstore::open(&cfg.storage).context("failed to open object store")?;
            let locator = ArtifactLocator::new(store, &cfg.artifacts);
            let prefix = prefix.unwrap_or_else(|| cfg.artifacts.prefix.clone());
            match locator.latest_key(&prefix).await {
                Ok(key) => {
                    println!("{}", key);
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    Ok(match e {
                        LocatorError::Configuration(_) => CycleExit::ConfigurationError.code(),
                        LocatorError::NotFound { .. } => CycleExit::LocatorFailed.code(),
                    })
                }
            }
        }
        Commands::History { limit } => {
            let warehouse = storage::open(&cfg.warehouse).context("failed to open warehouse")?;
            let runs = warehouse.run_log.recent_runs(limit).await?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!("{:<20} | {:<7} | Summary", "Created (UTC)", "Status");
                println!("{:-<20}-|-{:-<7}-|-{:-<40}", "", "", "");
                for run in runs {
                    let created = run
                        .created_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    let summary = run.details.lines().next().unwrap_or("");
                    println!("{:<20} | {:<7} | {}", created, run.status.as_str(), summary);
                }
            }
            Ok(0)
        }
        Commands::Config => {
            print!("{}", cfg.to_toml()?);
            Ok(0)
        }
    }
}
