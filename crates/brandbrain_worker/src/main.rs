//! BrandBrain compile worker.
//!
//! Usage:
//!     brandbrain-worker --poll-interval 5 --stale-check-interval 60
//!     brandbrain-worker --once
//!     brandbrain-worker --dry-run --max-jobs 10

mod runner;
mod shutdown;

use std::sync::Arc;

use clap::Parser;

use brandbrain_apify::ApifyClient;
use brandbrain_compile::{CompileWorker, StubDraftProducer};
use brandbrain_db::BrandBrainDb;
use brandbrain_logging::{init_logging, LogConfig};
use brandbrain_protocol::BrandBrainConfig;

use runner::{run, RunnerOptions};
use shutdown::ShutdownFlag;

#[derive(Parser, Debug)]
#[command(name = "brandbrain-worker", about = "Compile worker for BrandBrain")]
struct Args {
    /// Database URL (falls back to DATABASE_URL / the compiled default)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds to sleep between empty-queue polls
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Seconds between stale-lease sweeps
    #[arg(long, default_value_t = 60)]
    stale_check_interval: u64,

    /// Exit after processing this many jobs
    #[arg(long)]
    max_jobs: Option<u64>,

    /// Process a single job then exit
    #[arg(long)]
    once: bool,

    /// Claim and complete jobs without executing them
    #[arg(long)]
    dry_run: bool,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Verbose console logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(LogConfig {
        app_name: "brandbrain-worker",
        verbose: args.verbose,
        log_to_file: true,
    })?;

    let mut config = BrandBrainConfig::from_env();
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }
    let config = Arc::new(config);

    let worker_id = args.worker_id.clone().unwrap_or_else(|| {
        let suffix = uuid::Uuid::new_v4().to_string();
        let short = suffix.split('-').next().unwrap_or("0");
        format!("worker-{}-{}", std::process::id(), short)
    });

    tracing::info!("Starting BrandBrain worker");
    tracing::info!("  Database: {}", config.database_url);
    tracing::info!("  Worker ID: {}", worker_id);
    tracing::info!(
        "  Poll every {}s, stale sweep every {}s",
        args.poll_interval,
        args.stale_check_interval
    );

    let db = BrandBrainDb::open(&config.database_url).await?;
    let client = Arc::new(ApifyClient::new(
        &config.apify_base_url,
        &config.apify_api_token,
    )?);
    let worker = CompileWorker::new(
        db,
        client,
        config.clone(),
        Arc::new(StubDraftProducer),
        worker_id,
    );

    let shutdown = ShutdownFlag::new();
    shutdown.listen_for_signals();

    let options = RunnerOptions {
        poll_interval_s: args.poll_interval,
        stale_check_interval_s: args.stale_check_interval,
        max_jobs: args.max_jobs,
        once: args.once,
        dry_run: args.dry_run,
    };
    run(&worker, &options, &shutdown).await?;

    tracing::info!("Worker stopped");
    Ok(())
}
