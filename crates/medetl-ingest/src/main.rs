//! medetl Ingest - pipeline entry point

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use medetl_common::logging::{init_logging, LogConfig, LogLevel};
use medetl_ingest::monitor::ManifestWatcher;
use medetl_ingest::storage::open_store;
use medetl_ingest::summary::summarize_date;
use medetl_ingest::{ManifestReader, PipelineConfig, PipelineCoordinator, SourceKind};
use std::process;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "medetl-ingest")]
#[command(author, version, about = "FDA drug event and clinical trial ETL pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline for one logical date
    Run {
        /// Logical date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,

        /// Sources to run (default: all)
        #[arg(short, long = "source")]
        sources: Vec<SourceKind>,

        #[arg(long, env = "MEDETL_RATE_LIMIT_PER_SEC")]
        rate_limit: Option<u32>,

        #[arg(long, env = "MEDETL_RETRY_MAX_ATTEMPTS")]
        retry_max_attempts: Option<u32>,

        #[arg(long, env = "MEDETL_QUARANTINE_THRESHOLD")]
        quarantine_threshold: Option<f64>,

        #[arg(long, env = "MEDETL_STAGING_ROOT")]
        staging_root: Option<String>,

        #[arg(long, env = "MEDETL_MANIFEST_ROOT")]
        manifest_root: Option<String>,

        #[arg(long, env = "MEDETL_LOOKBACK_DAYS")]
        lookback_days: Option<u32>,
    },

    /// Print the current manifest of a partition
    Manifest {
        #[arg(short, long)]
        source: SourceKind,

        #[arg(short, long)]
        date: NaiveDate,

        /// Also check the data files against the manifest's hashes and counts
        #[arg(long)]
        verify: bool,
    },

    /// Per-drug summary of the published partitions of one logical date
    Summary {
        #[arg(short, long)]
        date: NaiveDate,
    },

    /// Delete abandoned staging runs
    Sweep {
        #[arg(short, long)]
        source: SourceKind,

        #[arg(long, default_value = "24")]
        older_than_hours: u64,
    },

    /// Poll the manifests of a logical date until interrupted
    Watch {
        #[arg(short, long)]
        date: NaiveDate,

        #[arg(long, default_value = "30")]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_config = log_config(cli.verbose);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            None
        },
    };

    match execute(cli.command).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            process::exit(1);
        },
    }
}

async fn execute(command: Command) -> Result<i32> {
    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;

    match command {
        Command::Run {
            date,
            sources,
            rate_limit,
            retry_max_attempts,
            quarantine_threshold,
            staging_root,
            manifest_root,
            lookback_days,
        } => {
            if let Some(v) = rate_limit {
                config.rate_limit_per_sec = v;
            }
            if let Some(v) = retry_max_attempts {
                config.retry_max_attempts = v;
            }
            if let Some(v) = quarantine_threshold {
                config.quarantine_threshold = v;
            }
            if let Some(v) = staging_root {
                config.staging_root = v;
            }
            if let Some(v) = manifest_root {
                config.manifest_root = v;
            }
            if let Some(v) = lookback_days {
                config.lookback_days = v;
            }
            config.validate()?;

            let sources = if sources.is_empty() {
                SourceKind::ALL.to_vec()
            } else {
                sources
            };

            let coordinator = PipelineCoordinator::from_config(config).await?;
            let cancel = shutdown_token();
            let result = coordinator.run(&sources, date, &cancel).await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(result.status.exit_code())
        },

        Command::Manifest { source, date, verify } => {
            let reader = ManifestReader::new(open_store(&config.manifest_root).await?);
            match reader.read(source, date).await? {
                Some(manifest) => {
                    if verify {
                        reader
                            .verify(&manifest)
                            .await
                            .with_context(|| format!("Partition {} on {} failed verification", source, date))?;
                    }
                    println!("{}", serde_json::to_string_pretty(&manifest)?);
                    Ok(0)
                },
                None => {
                    eprintln!("No manifest published for {} on {}", source, date);
                    Ok(1)
                },
            }
        },

        Command::Summary { date } => {
            let reader = ManifestReader::new(open_store(&config.manifest_root).await?);
            let summary = summarize_date(&reader, date).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(0)
        },

        Command::Sweep {
            source,
            older_than_hours,
        } => {
            let coordinator = PipelineCoordinator::from_config(config).await?;
            let removed = coordinator
                .sweep_staging(source, Duration::from_secs(older_than_hours * 3600))
                .await?;
            info!(%source, removed, "Staging sweep complete");
            println!("{}", removed);
            Ok(0)
        },

        Command::Watch { date, interval_secs } => {
            let reader = ManifestReader::new(open_store(&config.manifest_root).await?);
            let watcher = ManifestWatcher::new(
                reader,
                SourceKind::ALL.to_vec(),
                date,
                Duration::from_secs(interval_secs.max(1)),
            );
            watcher.run(shutdown_token()).await;
            Ok(0)
        },
    }
}

/// Binary defaults, then `LOG_*` overrides, then `--verbose`
fn log_config(verbose: bool) -> LogConfig {
    let defaults = LogConfig::builder()
        .log_file_prefix("medetl-ingest".to_string())
        .build();
    let mut config = match defaults.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid LOG_* settings: {e:#}");
            defaults
        },
    };
    if verbose {
        config.level = LogLevel::Debug;
    }
    config
}

/// Token cancelled on Ctrl-C
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, cancelling after the current page");
                trigger.cancel();
            },
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });
    token
}
