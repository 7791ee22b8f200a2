//! Station weather ingestion service.
//!
//! Thin CLI over the pipeline crates:
//! - `migrate` prepares the repository schema
//! - `poll --enqueue` queues a crawl job for every configured source
//! - `work` runs the worker pool consuming the queue

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ingestion::config::AppConfig;
use ingestion::worker::{self, WorkerPool};
use ingestion::{Crawler, SourceCatalog};
use storage::{PgRepository, QueueConfig, WorkQueue};

#[derive(Parser, Debug)]
#[command(name = "weatherd")]
#[command(about = "Weather source ingestion pipeline")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/sources.yaml")]
    config: PathBuf,

    /// Database connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare the repository schema.
    Migrate,
    /// Inspect the work queue, optionally enqueueing crawl jobs.
    Poll {
        /// Enqueue one job per configured source now
        #[arg(long)]
        enqueue: bool,
        /// Keep re-enqueueing on the configured cadence
        #[arg(long)]
        follow: bool,
    },
    /// Run the worker pool consuming the queue.
    Work {
        /// Number of concurrent workers (overrides config)
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting weatherd");

    let config = AppConfig::load(&args.config).context("Failed to load configuration")?;
    let repo = PgRepository::connect(&args.database_url)
        .await
        .context("Failed to connect to database")?;

    match args.command {
        Command::Migrate => {
            repo.migrate().await?;
            info!("Repository schema ready");
        }
        Command::Poll { enqueue, follow } => {
            let queue = WorkQueue::new(repo.pool().clone(), queue_config(&config));
            let source_ids: Vec<String> =
                config.enabled_sources().map(|s| s.id.clone()).collect();

            if enqueue && !follow {
                let enqueued = worker::enqueue_all(&queue, &source_ids).await?;
                info!(
                    enqueued = enqueued,
                    sources = source_ids.len(),
                    "Enqueued crawl jobs"
                );
            } else if follow {
                let interval = Duration::from_secs(config.ingest.poll_interval_secs);
                let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
                spawn_ctrl_c(shutdown_tx);
                worker::run_poller(&queue, &source_ids, interval, shutdown_rx).await?;
            }

            let stats = queue.stats().await?;
            info!(
                pending = stats.pending,
                leased = stats.leased,
                dead = stats.dead,
                "Queue state"
            );
            for dead in queue.dead_jobs().await? {
                tracing::error!(
                    source = %dead.source_id,
                    attempts = dead.attempts,
                    error = dead.last_error.as_deref().unwrap_or("unknown"),
                    "Dead job awaiting operator intervention"
                );
            }
        }
        Command::Work { workers } => {
            let queue = Arc::new(WorkQueue::new(repo.pool().clone(), queue_config(&config)));
            let catalog = SourceCatalog::new(&config)?;
            let repo = Arc::new(repo);
            let crawler = Arc::new(Crawler::new(catalog, repo));
            let pool = WorkerPool::new(queue, crawler, workers.unwrap_or(config.ingest.workers));

            let (shutdown_tx, _) = broadcast::channel(1);
            spawn_ctrl_c(shutdown_tx.clone());
            pool.run(shutdown_tx).await?;
        }
    }

    Ok(())
}

fn queue_config(config: &AppConfig) -> QueueConfig {
    QueueConfig {
        lease: Duration::from_secs(config.ingest.lease_secs),
        initial_backoff: Duration::from_secs(config.ingest.initial_backoff_secs),
        max_backoff: Duration::from_secs(config.ingest.max_backoff_secs),
        max_attempts: config.ingest.max_attempts,
    }
}

fn spawn_ctrl_c(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(()).ok();
    });
}
