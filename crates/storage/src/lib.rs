//! PostgreSQL-backed repository and work queue.

pub mod queue;
pub mod repository;

pub use queue::{DeadJob, Job, JobOutcome, JobStatus, QueueConfig, QueueStats, WorkQueue};
pub use repository::{PgRepository, Repository};
