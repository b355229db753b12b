//! Job execution: claim loops, the shell runner and the worker pool.

mod pool;
mod runner;
mod worker;

pub use pool::WorkerPool;
pub use runner::{CommandOutput, CommandRunner, ShellRunner, TIMEOUT_EXIT_CODE};
pub use worker::{Worker, WorkerSettings};
