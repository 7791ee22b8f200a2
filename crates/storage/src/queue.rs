//! Postgres-backed work queue with leases, backoff, and a dead-letter state.
//!
//! One logical job per source: enqueueing while a pending or leased job for
//! the same source exists is a no-op. Workers claim jobs with a bounded
//! lease; a crashed worker's job becomes reclaimable once the lease
//! expires. Failures reschedule with exponential backoff until the attempt
//! budget is spent, after which the job is parked as `dead` for an
//! operator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use met_common::{MetError, MetResult};

/// Job lifecycle states stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Leased,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "leased" => Self::Leased,
            "dead" => Self::Dead,
            _ => Self::Pending,
        }
    }
}

/// Tuning for leases and retry backoff.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claimed job stays unclaimable.
    pub lease: Duration,
    /// First retry delay (doubles each attempt).
    pub initial_backoff: Duration,
    /// Retry delay ceiling.
    pub max_backoff: Duration,
    /// Attempts before a job is parked as dead.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(600),
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
            max_attempts: 8,
        }
    }
}

/// A claimed job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub source_id: String,
    /// Completed attempts before this claim.
    pub attempts: i32,
}

/// What happened to a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Retried { run_after: DateTime<Utc> },
    Dead,
}

/// A job that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct DeadJob {
    pub id: Uuid,
    pub source_id: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Queue depth per state.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub leased: u64,
    pub dead: u64,
}

/// Postgres work queue over the shared repository pool.
pub struct WorkQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl WorkQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    /// Enqueue a crawl job for a source. Returns false when a pending or
    /// leased job for the source already exists.
    pub async fn enqueue(&self, source_id: &str) -> MetResult<bool> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, source_id, status) VALUES ($1, $2, 'pending') \
             ON CONFLICT (source_id) WHERE status IN ('pending', 'leased') DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Enqueue failed: {}", e)))?;

        let enqueued = result.rows_affected() > 0;
        if enqueued {
            debug!(source = %source_id, "Enqueued crawl job");
        }
        Ok(enqueued)
    }

    /// Claim the oldest runnable job: pending past its `run_after`, or
    /// leased past its expired lease (crash reclaim). Returns `None` when
    /// nothing is runnable right now.
    pub async fn dequeue(&self) -> MetResult<Option<Job>> {
        let row: Option<(Uuid, String, i32)> = sqlx::query_as(
            "UPDATE jobs \
             SET status = 'leased', lease_expires_at = NOW() + make_interval(secs => $1), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE (status = 'pending' AND run_after <= NOW()) \
                    OR (status = 'leased' AND lease_expires_at < NOW()) \
                 ORDER BY run_after ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING id, source_id, attempts",
        )
        .bind(self.config.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Dequeue failed: {}", e)))?;

        Ok(row.map(|(id, source_id, attempts)| Job {
            id,
            source_id,
            attempts,
        }))
    }

    /// Remove a finished job.
    pub async fn complete(&self, job: &Job) -> MetResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(|e| MetError::Repository(format!("Complete failed: {}", e)))?;
        Ok(())
    }

    /// Reschedule a failed job with backoff, or park it as dead once the
    /// attempt budget is spent.
    pub async fn fail(&self, job: &Job, error: &str) -> MetResult<JobOutcome> {
        let attempts = job.attempts.saturating_add(1);

        if attempts as u32 >= self.config.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'dead', attempts = $2, lease_expires_at = NULL, \
                 last_error = $3, updated_at = NOW() WHERE id = $1",
            )
            .bind(job.id)
            .bind(attempts)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| MetError::Repository(format!("Fail update failed: {}", e)))?;

            warn!(
                source = %job.source_id,
                attempts = attempts,
                "Job exhausted its retry budget"
            );
            return Ok(JobOutcome::Dead);
        }

        let delay = backoff_delay(&self.config, job.attempts as u32);
        let run_after = Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);

        sqlx::query(
            "UPDATE jobs SET status = 'pending', attempts = $2, run_after = $3, \
             lease_expires_at = NULL, last_error = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(job.id)
        .bind(attempts)
        .bind(run_after)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Fail update failed: {}", e)))?;

        Ok(JobOutcome::Retried { run_after })
    }

    /// Jobs parked for operator intervention.
    pub async fn dead_jobs(&self) -> MetResult<Vec<DeadJob>> {
        let rows: Vec<(Uuid, String, i32, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, source_id, attempts, last_error, updated_at \
             FROM jobs WHERE status = 'dead' ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Dead-job query failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(id, source_id, attempts, last_error, updated_at)| DeadJob {
                id,
                source_id,
                attempts,
                last_error,
                updated_at,
            })
            .collect())
    }

    /// Queue depth per state.
    pub async fn stats(&self) -> MetResult<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MetError::Repository(format!("Stats query failed: {}", e)))?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match JobStatus::from_str(&status) {
                JobStatus::Pending => stats.pending = count as u64,
                JobStatus::Leased => stats.leased = count as u64,
                JobStatus::Dead => stats.dead = count as u64,
            }
        }
        Ok(stats)
    }
}

/// Delay before the retry following `attempts` completed attempts.
fn backoff_delay(config: &QueueConfig, attempts: u32) -> Duration {
    let doubled = config
        .initial_backoff
        .saturating_mul(2u32.saturating_pow(attempts));
    doubled.min(config.max_backoff)
}
