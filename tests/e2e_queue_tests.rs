//! End-to-end tests for enqueue and inspection flows
//!
//! Drives the public library surface the way the CLI does: a queue facade
//! over a real database file, with workers claiming from their own handles.

mod common;

use common::TestQueue;
use queuectl::job_store::{JobState, JobStore};

// ============================================================================
// Enqueue
// ============================================================================

#[tokio::test]
async fn test_enqueue_then_complete() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let job = queue.enqueue(None, "echo from-e2e", None).unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);

    let (shutdown, handle) = fixture.spawn_pool(1);
    let done = fixture.wait_for_state(&job.id, JobState::Completed).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(done.attempts, 0);
    assert!(done.last_error.is_none());

    let logs = queue.recent_logs(&job.id, 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].attempt, 1);
    assert_eq!(logs[0].exit_code, 0);
    assert_eq!(logs[0].stdout.trim(), "from-e2e");
}

#[tokio::test]
async fn test_enqueue_with_explicit_id_rejects_duplicates() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let job = queue
        .enqueue(Some("nightly-report".into()), "true", None)
        .unwrap();
    assert_eq!(job.id, "nightly-report");

    let err = queue
        .enqueue(Some("nightly-report".into()), "false", None)
        .unwrap_err();
    assert!(err.to_string().contains("nightly-report"));

    // The original row is untouched.
    let stored = fixture.store.get_job("nightly-report").unwrap().unwrap();
    assert_eq!(stored.command, "true");
}

#[tokio::test]
async fn test_enqueue_rejects_blank_command() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    assert!(queue.enqueue(None, "", None).is_err());
    assert!(queue.enqueue(None, "   \t", None).is_err());
    assert_eq!(queue.counts().unwrap().pending, 0);
}

#[tokio::test]
async fn test_enqueue_uses_configured_default_retry_budget() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let defaulted = queue.enqueue(None, "true", None).unwrap();
    assert_eq!(defaulted.max_retries, 3);

    let explicit = queue.enqueue(None, "true", Some(7)).unwrap();
    assert_eq!(explicit.max_retries, 7);
}

// ============================================================================
// Listing and counts
// ============================================================================

#[tokio::test]
async fn test_list_filters_by_state() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    for i in 0..3 {
        queue
            .enqueue(Some(format!("job-{}", i)), "true", None)
            .unwrap();
    }

    let all = queue.list(None, 50).unwrap();
    assert_eq!(all.len(), 3);
    // FIFO by creation time.
    assert_eq!(all[0].id, "job-0");

    let pending = queue.list(Some(JobState::Pending), 50).unwrap();
    assert_eq!(pending.len(), 3);

    let dead = queue.list(Some(JobState::Dead), 50).unwrap();
    assert!(dead.is_empty());

    let limited = queue.list(None, 2).unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_status_counts_track_lifecycle() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let counts = queue.counts().unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.completed, 0);

    let job = queue.enqueue(None, "true", None).unwrap();
    assert_eq!(queue.counts().unwrap().pending, 1);

    let (shutdown, handle) = fixture.spawn_pool(1);
    fixture.wait_for_state(&job.id, JobState::Completed).await;
    shutdown.cancel();
    handle.await.unwrap();

    let counts = queue.counts().unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.dead, 0);
}

// ============================================================================
// Execution logs
// ============================================================================

#[tokio::test]
async fn test_logs_capture_stdout_and_stderr() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    let job = queue
        .enqueue(None, "echo out-line; echo err-line >&2", None)
        .unwrap();

    let (shutdown, handle) = fixture.spawn_pool(1);
    fixture.wait_for_state(&job.id, JobState::Completed).await;
    shutdown.cancel();
    handle.await.unwrap();

    let logs = queue.recent_logs(&job.id, 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].stdout.trim(), "out-line");
    assert_eq!(logs[0].stderr.trim(), "err-line");
    assert!(logs[0].duration_ms >= 0);
}

#[tokio::test]
async fn test_logs_for_unknown_job_are_empty() {
    let fixture = TestQueue::new();
    let queue = fixture.queue();

    assert!(queue.recent_logs("no-such-job", 10).unwrap().is_empty());
}
