//! Catalog schema.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::Catalog;
use tracing::info;

const TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        email TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 0,
        notify INTEGER NOT NULL DEFAULT 0,
        admin INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tasks (
        task_id TEXT PRIMARY KEY,
        dataset TEXT NOT NULL,
        region TEXT NOT NULL,
        image_date TEXT NOT NULL,
        state TEXT NOT NULL,
        job_id TEXT NOT NULL DEFAULT 'none',
        federation_member TEXT NOT NULL DEFAULT 'none',
        priority INTEGER NOT NULL DEFAULT 0,
        user_email TEXT NOT NULL REFERENCES users(email),
        input_downloading_tag TEXT NOT NULL DEFAULT '',
        input_downloading_digest TEXT NOT NULL DEFAULT '',
        preprocessing_tag TEXT NOT NULL DEFAULT '',
        preprocessing_digest TEXT NOT NULL DEFAULT '',
        processing_tag TEXT NOT NULL DEFAULT '',
        processing_digest TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'available',
        error TEXT
    )"#,
    // Append-only audit trail, one row per observed transition
    r#"CREATE TABLE IF NOT EXISTS state_timestamps (
        task_id TEXT NOT NULL,
        state TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS notify (
        submission_id TEXT NOT NULL,
        task_id TEXT NOT NULL,
        user_email TEXT NOT NULL,
        PRIMARY KEY (submission_id, task_id, user_email)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS deploy_config (
        federation_member TEXT PRIMARY KEY,
        nfs_ip TEXT NOT NULL,
        nfs_ssh_port TEXT NOT NULL,
        nfs_port TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS provenance (
        task_id TEXT PRIMARY KEY REFERENCES tasks(task_id),
        input_metadata TEXT,
        input_operating_system TEXT,
        input_kernel_version TEXT,
        preprocessing_metadata TEXT,
        preprocessing_operating_system TEXT,
        preprocessing_kernel_version TEXT,
        output_metadata TEXT,
        output_operating_system TEXT,
        output_kernel_version TEXT
    )"#,
    // Per-task advisory locks taken before the claim transition
    r#"CREATE TABLE IF NOT EXISTS task_locks (
        task_id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        acquired_at INTEGER NOT NULL
    )"#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tasks_state_priority ON tasks(state, priority)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_region_date ON tasks(region, image_date)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_member ON tasks(federation_member)",
    "CREATE INDEX IF NOT EXISTS idx_timestamps_task ON state_timestamps(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_locks_owner ON task_locks(owner)",
];

impl Catalog {
    /// Ensure all tables and indexes exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in TABLES.iter().chain(INDEXES) {
            self.timed(sqlx::query(*statement).execute(&self.pool)).await?;
        }

        info!("Catalog schema verified");
        Ok(())
    }
}
