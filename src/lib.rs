//! Queuectl Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod job_store;
pub mod queue;
pub mod sqlite_persistence;
pub mod worker;

// Re-export commonly used types for convenience
pub use job_store::{Job, JobState, JobStore, SqliteJobStore};
pub use queue::{DeadLetterManager, JobQueue, QueueError};
pub use worker::{WorkerPool, WorkerSettings};
