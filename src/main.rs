//! altsync CLI - bulk image alt-text updates against the VTEX catalog API.

use altsync::checkpoint::CheckpointStore;
use altsync::pipeline::{load_item_ids, prune_input_file};
use altsync::{
    BulkUpdatePipeline, CheckpointReport, Config, LabelNormalizer, PipelineOptions,
    ReqwestBackend, RunDisposition, RunSummary,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "altsync")]
#[command(version)]
#[command(about = "Bulk image alt-text updater for a VTEX catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply when absent)
    #[arg(short, long, global = true, default_value = "altsync.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append JSON log records to this file
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Update image alt-text for every SKU in the input list
    Run {
        /// Line-delimited SKU id list
        #[arg(short, long, default_value = "sku_ids.txt")]
        input: PathBuf,

        /// Checkpoint file (overrides checkpoint.path)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Store account (overrides catalog.account)
        #[arg(long)]
        account: Option<String>,

        /// Concurrent workers (overrides workers.size)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Move the existing checkpoint aside and start over
        #[arg(long)]
        fresh: bool,

        /// Do not retry SKUs that failed in an earlier run
        #[arg(long)]
        skip_failed: bool,

        /// Remove finished SKUs from the input list after the run
        #[arg(long)]
        prune_input: bool,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Summarize a checkpoint without calling the API
    Report {
        /// Checkpoint file (overrides checkpoint.path)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// SKU list to count pending items against
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file and credential
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool, log_json: Option<&Path>) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let stderr_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .with_filter(stderr_filter);

    let json_layer = match log_json {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path:?}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .context("Failed to set up logging")?;
    Ok(())
}

fn print_example_config() {
    let example = r#"# altsync configuration file

[catalog]
account = "bemol"
# base_url = "https://bemol.vtexcommercestable.com.br/api/catalog/pvt"
# Credential comes from this env var unless catalog.credential is set
credential_env = "VTEX_COOKIE"
# credential = "${VTEX_COOKIE}"
auth_header = "VtexIdclientAutCookie"
# auth_prefix = "Bearer "
timeout_secs = 30

[retry]
max_retries = 3
base_delay_ms = 1000
max_delay_secs = 60
max_retry_after_secs = 120

[workers]
size = 3
rate_limit_delay_ms = 300

[labels]
fallback = "produto farmacêutico"
policy = "replace"          # or "fill_missing"
preserve_terms = ["mg", "mL", "NIVEA"]

[checkpoint]
path = "checkpoint.json"
retry_failed = true
"#;
    println!("{example}");
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    println!("\n=== Alt-text Update Summary ===");
    println!("SKUs:           {}", stats.total_items);
    println!("Already done:   {}", stats.already_done);
    println!("Completed:      {}", stats.completed);
    println!("Skipped:        {}", stats.skipped);
    println!("Failed:         {}", stats.failed);
    println!("Not started:    {}", stats.not_started);
    println!("Images written: {}", stats.labels_written);
    println!("Runtime:        {:.1}s", stats.runtime_secs);
    println!("Throughput:     {:.0}/hr", stats.throughput_per_hour);
    println!("Disposition:    {}", summary.disposition);

    if !summary.failures.is_empty() {
        println!("\nFailed SKUs:");
        for (id, detail) in &summary.failures {
            println!("  {id}: {detail}");
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file_or_default(path)
        .with_context(|| format!("Failed to load config from {path:?}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_json.as_deref())?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;
            let normalizer =
                LabelNormalizer::new(&config.labels).context("Invalid label rules")?;
            config
                .resolve_credential()
                .context("Failed to resolve catalog credential")?;

            info!("Configuration is valid");
            info!("  Catalog: {}", config.catalog.resolved_base_url());
            info!(
                "  Workers: {} (one request every {} ms)",
                config.workers.size, config.workers.rate_limit_delay_ms
            );
            info!("  Retries: {}", config.retry.max_retries);
            info!(
                "  Labels: {:?} policy, fallback {:?}",
                config.labels.policy,
                normalizer.fallback()
            );
            info!("  Checkpoint: {:?}", config.checkpoint.path);
        }

        Commands::Report {
            checkpoint,
            input,
            json,
        } => {
            let config = load_config(&cli.config)?;
            let path = checkpoint.unwrap_or(config.checkpoint.path);
            let state = CheckpointStore::load(&path)
                .with_context(|| format!("Failed to read checkpoint {path:?}"))?;
            let ids = match &input {
                Some(input) => Some(load_item_ids(input)?),
                None => None,
            };

            let report = CheckpointReport::build(&state, ids.as_deref());
            if json {
                let out = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize report")?;
                println!("{out}");
            } else {
                print!("{report}");
            }
        }

        Commands::Run {
            input,
            checkpoint,
            account,
            workers,
            fresh,
            skip_failed,
            prune_input,
            quiet,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(account) = account {
                config.catalog.account = account;
            }
            if let Some(workers) = workers {
                config.workers.size = workers;
            }
            if let Some(checkpoint) = checkpoint {
                config.checkpoint.path = checkpoint;
            }
            if skip_failed {
                config.checkpoint.retry_failed = false;
            }
            config.validate().context("Invalid configuration")?;

            let credential = config
                .resolve_credential()
                .context("Failed to resolve catalog credential")?;

            if fresh {
                CheckpointStore::reset(&config.checkpoint.path)
                    .context("Failed to move checkpoint aside")?;
            }
            let checkpoint = Arc::new(
                CheckpointStore::open(&config.checkpoint.path)
                    .context("Refusing to start: checkpoint cannot be trusted")?,
            );

            let ids = load_item_ids(&input)?;
            let backend = Arc::new(ReqwestBackend::new(&config.catalog, &credential)?);

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing in-flight requests");
                    interrupt.cancel();
                }
            });

            let options = PipelineOptions {
                show_progress: !quiet,
                ..PipelineOptions::from_config(&config)
            };
            let pipeline = BulkUpdatePipeline::from_config(
                &config,
                backend,
                Arc::clone(&checkpoint),
                options,
                cancel,
            )?;

            let summary = pipeline.run(ids).await;
            print_summary(&summary);

            if prune_input {
                let state = checkpoint.snapshot().await;
                prune_input_file(&input, &state, config.checkpoint.retry_failed)
                    .context("Failed to prune input list")?;
            }

            return Ok(match summary.disposition {
                RunDisposition::Completed => ExitCode::SUCCESS,
                RunDisposition::AbortedUnauthorized => ExitCode::from(2),
                RunDisposition::AbortedOther { .. } => ExitCode::from(1),
            });
        }
    }

    Ok(ExitCode::SUCCESS)
}
