//! Worker pool consuming the work queue, and the poll-cadence enqueuer.
//!
//! Workers coordinate only through the queue and the repository; there is
//! no in-memory sharing between them. The queue guarantees at most one
//! in-flight job per source, so per-source fingerprint dedup never races
//! against itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use met_common::MetResult;
use storage::{Job, JobOutcome, Repository, WorkQueue};

use crate::crawler::Crawler;

/// How long an idle worker waits before polling the queue again.
const IDLE_POLL: Duration = Duration::from_secs(5);

pub struct WorkerPool<R: Repository + 'static> {
    queue: Arc<WorkQueue>,
    crawler: Arc<Crawler<R>>,
    workers: usize,
}

impl<R: Repository + 'static> WorkerPool<R> {
    pub fn new(queue: Arc<WorkQueue>, crawler: Arc<Crawler<R>>, workers: usize) -> Self {
        Self {
            queue,
            crawler,
            workers,
        }
    }

    /// Run until shutdown; each worker claims one source job at a time.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> MetResult<()> {
        info!(workers = self.workers, "Starting worker pool");

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let queue = self.queue.clone();
            let crawler = self.crawler.clone();
            let mut shutdown_rx = shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!(worker = worker_id, "Worker shutting down");
                            break;
                        }
                        claimed = queue.dequeue() => match claimed {
                            Ok(Some(job)) => run_job(&queue, &crawler, job, worker_id).await,
                            Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                            Err(e) => {
                                error!(worker = worker_id, error = %e, "Dequeue failed");
                                tokio::time::sleep(IDLE_POLL).await;
                            }
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.ok();
        }
        Ok(())
    }
}

async fn run_job<R: Repository>(
    queue: &WorkQueue,
    crawler: &Crawler<R>,
    job: Job,
    worker_id: usize,
) {
    info!(
        worker = worker_id,
        source = %job.source_id,
        attempt = job.attempts,
        "Claimed job"
    );

    match crawler.crawl_source(&job.source_id).await {
        Ok(report) => {
            info!(
                worker = worker_id,
                source = %job.source_id,
                records = report.records_committed,
                "Job complete"
            );
            if let Err(e) = queue.complete(&job).await {
                error!(source = %job.source_id, error = %e, "Failed to complete job");
            }
        }
        Err(e) => {
            warn!(
                worker = worker_id,
                source = %job.source_id,
                error = %e,
                "Job failed"
            );
            match queue.fail(&job, &e.to_string()).await {
                Ok(JobOutcome::Dead) => {
                    error!(source = %job.source_id, "Job parked for operator intervention");
                }
                Ok(JobOutcome::Retried { run_after }) => {
                    info!(source = %job.source_id, run_after = %run_after, "Job scheduled for retry");
                }
                Err(e) => {
                    error!(source = %job.source_id, error = %e, "Failed to record job failure");
                }
            }
        }
    }
}

/// Enqueue every given source; idempotent while a job is pending or
/// in flight. Returns how many jobs were actually enqueued.
pub async fn enqueue_all(queue: &WorkQueue, source_ids: &[String]) -> MetResult<usize> {
    let mut enqueued = 0;
    for source_id in source_ids {
        if queue.enqueue(source_id).await? {
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

/// Re-enqueue every source on a fixed cadence until shutdown. The cadence
/// is independent of whether the prior run found new files; upstream
/// publishes on its own schedule and the fingerprint ledger makes the
/// repeat cheap.
pub async fn run_poller(
    queue: &WorkQueue,
    source_ids: &[String],
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> MetResult<()> {
    loop {
        match enqueue_all(queue, source_ids).await {
            Ok(enqueued) => info!(enqueued = enqueued, "Poll cycle enqueued sources"),
            Err(e) => warn!(error = %e, "Poll cycle failed"),
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down poller");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    Ok(())
}
