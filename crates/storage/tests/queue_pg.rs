//! Work queue behavior against a live PostgreSQL instance.
//!
//! These tests need a throwaway database; run them with
//! `DATABASE_URL=postgres://... cargo test -p storage -- --ignored --test-threads=1`.

use storage::{PgRepository, QueueConfig, WorkQueue};

async fn setup(source_id: &str) -> (PgRepository, WorkQueue) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let repo = PgRepository::connect(&url).await.unwrap();
    repo.migrate().await.unwrap();

    sqlx::query("DELETE FROM jobs WHERE source_id = $1")
        .bind(source_id)
        .execute(repo.pool())
        .await
        .unwrap();

    let queue = WorkQueue::new(repo.pool().clone(), QueueConfig::default());
    (repo, queue)
}

#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_enqueue_is_idempotent_while_job_active() {
    let source = "queue_test_idempotent";
    let (_repo, queue) = setup(source).await;

    assert!(queue.enqueue(source).await.unwrap());
    assert!(!queue.enqueue(source).await.unwrap());

    let job = queue.dequeue().await.unwrap().expect("job claimable");
    assert_eq!(job.source_id, source);

    // Still a no-op while the job is leased.
    assert!(!queue.enqueue(source).await.unwrap());

    queue.complete(&job).await.unwrap();
    assert!(queue.enqueue(source).await.unwrap());

    // Leave nothing behind for the other tests.
    let job = queue.dequeue().await.unwrap().expect("job claimable");
    queue.complete(&job).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_failed_job_is_rescheduled_with_backoff() {
    let source = "queue_test_backoff";
    let (_repo, queue) = setup(source).await;

    assert!(queue.enqueue(source).await.unwrap());
    let job = queue.dequeue().await.unwrap().expect("job claimable");

    let outcome = queue.fail(&job, "synthetic failure").await.unwrap();
    match outcome {
        storage::JobOutcome::Retried { run_after } => {
            assert!(run_after > chrono::Utc::now());
        }
        other => panic!("expected retry, got {:?}", other),
    }

    // Not runnable until the backoff elapses.
    assert!(queue.dequeue().await.unwrap().is_none());
}
