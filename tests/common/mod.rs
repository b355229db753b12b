//! Common test infrastructure
//!
//! Provides the shared queue fixture for end-to-end tests: a real database
//! file in a temp directory, so stores and worker pools can open independent
//! handles on it the way separate processes would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use queuectl::job_store::{Job, JobState, JobStore, SqliteJobStore};
use queuectl::queue::{DeadLetterManager, JobQueue};
use queuectl::worker::{WorkerPool, WorkerSettings};

pub struct TestQueue {
    pub db_path: PathBuf,
    pub store: Arc<SqliteJobStore>,
    // Keep the temp dir alive for the lifetime of the fixture
    _temp_dir: TempDir,
}

impl TestQueue {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        let store = Arc::new(SqliteJobStore::open(&db_path).unwrap());
        TestQueue {
            db_path,
            store,
            _temp_dir: temp_dir,
        }
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.store.clone())
    }

    #[allow(dead_code)]
    pub fn dead_letters(&self) -> DeadLetterManager {
        DeadLetterManager::new(self.store.clone())
    }

    /// Overwrite the stored backoff base the way an operator would, with a
    /// direct database edit. Zero makes failed jobs eligible again at once.
    #[allow(dead_code)]
    pub fn set_backoff_base(&self, value: &str) {
        let conn = rusqlite::Connection::open(&self.db_path).unwrap();
        conn.execute(
            "UPDATE config SET value = ?1 WHERE key = 'backoff_base'",
            [value],
        )
        .unwrap();
    }

    /// Spawn a worker pool over this queue's database file. Returns the
    /// token that stops it and the handle to await for a clean drain.
    pub fn spawn_pool(&self, count: usize) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let settings = WorkerSettings {
            poll_interval: Duration::from_millis(20),
            command_timeout: None,
        };
        let pool = WorkerPool::new(self.db_path.clone(), settings);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            pool.run(count, token).await.unwrap();
        });
        (shutdown, handle)
    }

    /// Poll until the job reaches the wanted state, panicking after ~3s.
    pub async fn wait_for_state(&self, job_id: &str, state: JobState) -> Job {
        for _ in 0..300 {
            if let Some(job) = self.store.get_job(job_id).unwrap() {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached state {:?}", job_id, state);
    }
}
