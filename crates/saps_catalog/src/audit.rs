//! Per-transition state timestamps.

use crate::error::{CatalogError, Result};
use crate::types::{StateTimestamp, TaskState};
use crate::Catalog;
use chrono::{DateTime, Utc};
use sqlx::Row;

impl Catalog {
    pub async fn add_state_timestamp(&self, task_id: &str, state: TaskState, at: DateTime<Utc>) -> Result<()> {
        self.timed(
            sqlx::query("INSERT INTO state_timestamps (task_id, state, timestamp) VALUES (?, ?, ?)")
                .bind(task_id)
                .bind(state.as_str())
                .bind(at.timestamp_millis())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Exact-match delete on (task id, state, timestamp at millisecond precision).
    ///
    /// Returns the number of rows removed; zero is not an error.
    pub async fn remove_state_timestamp(&self, task_id: &str, state: TaskState, at: DateTime<Utc>) -> Result<u64> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM state_timestamps WHERE task_id = ? AND state = ? AND timestamp = ?")
                    .bind(task_id)
                    .bind(state.as_str())
                    .bind(at.timestamp_millis())
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    /// Audit trail for a task, oldest first.
    pub async fn get_state_timestamps(&self, task_id: &str) -> Result<Vec<StateTimestamp>> {
        let rows = self
            .timed(
                sqlx::query(
                    "SELECT task_id, state, timestamp FROM state_timestamps WHERE task_id = ? ORDER BY timestamp ASC, rowid ASC",
                )
                .bind(task_id)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<StateTimestamp> {
                let state_str: String = row.try_get("state")?;
                let state = TaskState::parse(&state_str).ok_or_else(|| {
                    CatalogError::invalid_state(format!("Unknown task state: {}", state_str))
                })?;
                Ok(StateTimestamp {
                    task_id: row.try_get("task_id")?,
                    state,
                    timestamp: Self::millis_to_datetime(row.try_get("timestamp")?),
                })
            })
            .collect()
    }
}
