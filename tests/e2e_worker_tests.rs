//! End-to-end tests for retries, the dead-letter flow and metrics
//!
//! These run real shell commands through a worker pool against a temp
//! database, with the backoff base dropped to zero so retries are immediate.

mod common;

use common::TestQueue;
use queuectl::job_store::{JobState, JobStore};

// ============================================================================
// Retry and dead-letter lifecycle
// ============================================================================

#[tokio::test]
async fn test_failing_job_retries_until_dead() {
    let fixture = TestQueue::new();
    fixture.set_backoff_base("0");
    let queue = fixture.queue();

    let job = queue
        .enqueue(None, "echo boom >&2; exit 7", Some(2))
        .unwrap();

    let (shutdown, handle) = fixture.spawn_pool(1);
    let dead = fixture.wait_for_state(&job.id, JobState::Dead).await;
    shutdown.cancel();
    handle.await.unwrap();

    // One initial run plus two retries.
    assert_eq!(dead.attempts, 3);
    assert_eq!(dead.last_error.as_deref(), Some("boom"));

    let logs = queue.recent_logs(&job.id, 10).unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|entry| entry.exit_code == 7));
    // Newest first.
    assert_eq!(logs[0].attempt, 3);
    assert_eq!(logs[2].attempt, 1);
}

#[tokio::test]
async fn test_requeue_gives_dead_job_a_fresh_budget() {
    let fixture = TestQueue::new();
    fixture.set_backoff_base("0");
    let queue = fixture.queue();
    let dead_letters = fixture.dead_letters();

    // Succeeds only once the marker file exists.
    let marker = fixture.db_path.with_file_name("marker");
    let job = queue
        .enqueue(None, &format!("test -f {}", marker.display()), Some(0))
        .unwrap();

    let (shutdown, handle) = fixture.spawn_pool(1);
    fixture.wait_for_state(&job.id, JobState::Dead).await;

    let listed = dead_letters.list_dead(10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, job.id);

    std::fs::write(&marker, "").unwrap();
    assert!(dead_letters.requeue(&job.id).unwrap());

    let done = fixture.wait_for_state(&job.id, JobState::Completed).await;
    shutdown.cancel();
    handle.await.unwrap();

    // Requeue wiped the failure history on the job row.
    assert_eq!(done.attempts, 0);
    assert!(done.last_error.is_none());
}

#[tokio::test]
async fn test_requeue_rejects_jobs_that_are_not_dead() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();
    let dead_letters = fixture.dead_letters();

    let job = queue.enqueue(None, "true", None).unwrap();

    assert!(!dead_letters.requeue(&job.id).unwrap());
    assert!(!dead_letters.requeue("no-such-job").unwrap());

    let unchanged = fixture.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(unchanged.state, JobState::Pending);
    assert_eq!(unchanged.attempts, 0);
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn test_metrics_aggregate_runs_and_dead_jobs() {
    let fixture = TestQueue::new();
    fixture.set_backoff_base("0");
    let queue = fixture.queue();

    let ok = queue.enqueue(None, "true", None).unwrap();
    let bad = queue.enqueue(None, "false", Some(1)).unwrap();

    let (shutdown, handle) = fixture.spawn_pool(1);
    fixture.wait_for_state(&ok.id, JobState::Completed).await;
    fixture.wait_for_state(&bad.id, JobState::Dead).await;
    shutdown.cancel();
    handle.await.unwrap();

    let metrics = fixture.dead_letters().metrics().unwrap();
    // One successful run plus two failing ones.
    assert_eq!(metrics.total_runs, 3);
    assert_eq!(metrics.failed_runs, 2);
    assert_eq!(metrics.dead_count, 1);
    assert!(metrics.avg_duration_ms >= 0.0);
}

// ============================================================================
// Pool behavior
// ============================================================================

#[tokio::test]
async fn test_pool_drains_queue_across_workers() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let mut ids = Vec::new();
    for i in 0..10 {
        let job = queue
            .enqueue(Some(format!("drain-{}", i)), "true", None)
            .unwrap();
        ids.push(job.id);
    }

    let (shutdown, handle) = fixture.spawn_pool(4);
    for id in &ids {
        fixture.wait_for_state(id, JobState::Completed).await;
    }
    shutdown.cancel();
    handle.await.unwrap();

    // Exactly one execution per job despite the claim races.
    for id in &ids {
        let logs = queue.recent_logs(id, 10).unwrap();
        assert_eq!(logs.len(), 1, "job {} ran {} times", id, logs.len());
    }

    let counts = queue.counts().unwrap();
    assert_eq!(counts.completed, 10);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_command() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let job = queue.enqueue(None, "sleep 0.3", None).unwrap();

    let (shutdown, handle) = fixture.spawn_pool(1);
    fixture.wait_for_state(&job.id, JobState::Processing).await;

    shutdown.cancel();
    handle.await.unwrap();

    // The in-flight command ran to completion before the pool returned.
    let done = fixture.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(done.state, JobState::Completed);
}
