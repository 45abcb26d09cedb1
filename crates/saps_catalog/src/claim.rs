//! Claim, rollback and archive transitions.
//!
//! Every transition here is a conditional UPDATE on the expected source
//! state, so two processes racing on the same task cannot both succeed no
//! matter how stale their earlier reads were.

use crate::error::{CatalogError, Result};
use crate::tasks::placeholders;
use crate::types::*;
use crate::Catalog;
use tracing::{debug, info};

impl Catalog {
    // ========================================================================
    // Advisory Locks
    // ========================================================================

    /// Take the per-task advisory lock for `owner`.
    ///
    /// Returns false when another owner holds it. Re-acquiring a lock the
    /// owner already holds succeeds.
    pub async fn try_lock_task(&self, task_id: &str, owner: &str) -> Result<bool> {
        let result = self
            .timed(
                sqlx::query(
                    r#"INSERT INTO task_locks (task_id, owner, acquired_at) VALUES (?, ?, ?)
                    ON CONFLICT(task_id) DO UPDATE SET acquired_at = excluded.acquired_at
                    WHERE task_locks.owner = excluded.owner"#,
                )
                .bind(task_id)
                .bind(owner)
                .bind(Self::now_millis())
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release the lock if `owner` holds it.
    pub async fn unlock_task(&self, task_id: &str, owner: &str) -> Result<bool> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM task_locks WHERE task_id = ? AND owner = ?")
                    .bind(task_id)
                    .bind(owner)
                    .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drop every lock left behind by `owner` (after a crash).
    pub async fn release_locks_held_by(&self, owner: &str) -> Result<u64> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM task_locks WHERE owner = ?")
                    .bind(owner)
                    .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Claim transition: `Created | NotDownloaded -> Downloading`, assigning
    /// `member` as the owner of the download.
    ///
    /// Idempotent for the owner: a task already DOWNLOADING for `member` is
    /// returned as claimed, so a retry after a committed UPDATE succeeds.
    /// Fails with `LockContention` when the task is no longer claimable and
    /// `NotFound` when it does not exist.
    pub async fn claim_task(&self, task_id: &str, member: &str) -> Result<Task> {
        let sql = format!(
            "UPDATE tasks SET state = ?, federation_member = ?, error = NULL, updated_at = ? \
             WHERE task_id = ? AND state IN ({})",
            placeholders(TaskState::CLAIMABLE.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(TaskState::Downloading.as_str())
            .bind(member)
            .bind(Self::now_millis())
            .bind(task_id);
        for state in TaskState::CLAIMABLE {
            query = query.bind(state.as_str());
        }
        let result = self.timed(query.execute(&self.pool)).await?;

        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("Task {task_id}")))?;

        if result.rows_affected() == 0 {
            if task.state == TaskState::Downloading && task.is_owned_by(member) {
                debug!(task_id, member, "Task already claimed by this member");
                return Ok(task);
            }
            return Err(CatalogError::lock_contention(format!(
                "Task {} is {} (owner {})",
                task_id, task.state, task.federation_member
            )));
        }

        info!(task_id, member, "Task claimed");
        Ok(task)
    }

    /// Roll an interrupted or failed download back to `NotDownloaded`.
    ///
    /// Only applies while the task is still `Downloading` and owned by
    /// `member`; returns whether a row changed.
    pub async fn release_claim(&self, task_id: &str, member: &str, error: Option<&str>) -> Result<bool> {
        let result = self
            .timed(
                sqlx::query(
                    r#"UPDATE tasks SET state = ?, federation_member = ?, error = ?, updated_at = ?
                    WHERE task_id = ? AND state = ? AND federation_member = ?"#,
                )
                .bind(TaskState::NotDownloaded.as_str())
                .bind(NONE)
                .bind(error)
                .bind(Self::now_millis())
                .bind(task_id)
                .bind(TaskState::Downloading.as_str())
                .bind(member)
                .execute(&self.pool),
            )
            .await?;

        let released = result.rows_affected() > 0;
        debug!(task_id, member, released, "Claim released");
        Ok(released)
    }

    /// Move a task from `from` to `to` only if it is still in `from`.
    ///
    /// `error` replaces the stored error message. Returns whether a row changed.
    pub async fn transition_task(
        &self,
        task_id: &str,
        from: TaskState,
        to: TaskState,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = self
            .timed(
                sqlx::query(
                    "UPDATE tasks SET state = ?, error = ?, updated_at = ? WHERE task_id = ? AND state = ?",
                )
                .bind(to.as_str())
                .bind(error)
                .bind(Self::now_millis())
                .bind(task_id)
                .bind(from.as_str())
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Archive transition start: `Finished -> Archiving`.
    ///
    /// A task already ARCHIVING is returned as is; there is one archiver
    /// per deployment and it rolls stale ARCHIVING tasks back on startup.
    pub async fn begin_archiving(&self, task_id: &str) -> Result<Task> {
        let moved = self
            .transition_task(task_id, TaskState::Finished, TaskState::Archiving, None)
            .await?;

        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("Task {task_id}")))?;

        if !moved && task.state != TaskState::Archiving {
            return Err(CatalogError::lock_contention(format!(
                "Task {} is {}, not finished",
                task_id, task.state
            )));
        }
        Ok(task)
    }
}
