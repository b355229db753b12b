//! SQLite schema for the queue database.
//!
//! Three tables: `jobs` (the queue itself), `execution_logs` (append-only
//! run history) and `config` (key/value tunables seeded with defaults).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// Jobs table - one row per enqueued command, keyed by caller-visible id.
const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("command", &SqlType::Text, non_null = true),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "max_retries",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("3")
        ),
        sqlite_column!(
            "run_after",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_error", &SqlType::Text),
    ],
    indices: &[
        // Claim scans filter on state + run_after, then order by created_at.
        ("idx_jobs_state_run_after", "state, run_after"),
        // Dead-letter listing orders by most recently updated.
        ("idx_jobs_updated_at", "updated_at DESC"),
    ],
};

/// Execution logs table - append-only history of every run.
const EXECUTION_LOGS_TABLE_V1: Table = Table {
    name: "execution_logs",
    columns: &[
        // Rowid alias; the table is append-only so ids stay monotonic.
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("attempt", &SqlType::Integer, non_null = true),
        sqlite_column!("exit_code", &SqlType::Integer, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("stdout", &SqlType::Text, non_null = true),
        sqlite_column!("stderr", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_execution_logs_job_id", "job_id, id DESC")],
};

/// Config table - key/value store for queue tunables.
const CONFIG_TABLE_V1: Table = Table {
    name: "config",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// All versioned schemas for the queue database.
///
/// Version 1: jobs, execution_logs and config tables.
pub const QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[JOBS_TABLE_V1, EXECUTION_LOGS_TABLE_V1, CONFIG_TABLE_V1],
}];
