//! Archive sweep: FINISHED -> ARCHIVING -> ARCHIVED, plus notification drain.

use chrono::Utc;
use saps_catalog::{
    CatalogError, Limit, RetryingCatalog, Task, TaskState, STATUS_DEBUG_ARCHIVED, STATUS_DEBUG_ARCHIVE_FAILED,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::ArchiverError;
use crate::notify::NotificationSink;
use crate::storage::PermanentStorage;

/// Outcome counters of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub archived: usize,
    pub failed: usize,
    pub debug_archived: usize,
    pub notified: usize,
}

pub struct Archiver {
    catalog: RetryingCatalog,
    storage: PermanentStorage,
    sink: Arc<dyn NotificationSink>,
}

impl Archiver {
    pub fn new(catalog: RetryingCatalog, storage: PermanentStorage, sink: Arc<dyn NotificationSink>) -> Self {
        Self { catalog, storage, sink }
    }

    pub fn storage(&self) -> &PermanentStorage {
        &self.storage
    }

    /// Return tasks a previous run left in ARCHIVING to FINISHED so the next
    /// sweep picks them up again. Call before the first sweep.
    pub async fn recover(&self) -> Result<usize, ArchiverError> {
        let stale = self
            .catalog
            .get_tasks(TaskState::Archiving, Limit::Unlimited)
            .await?;

        let mut recovered = 0;
        for task in stale {
            if self.roll_back(&task.task_id, "Archive interrupted; rolled back on restart").await? {
                warn!(task_id = %task.task_id, "Recovered interrupted archive");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Sweep every `period` until a permanent catalog error occurs.
    pub async fn run(&self, period: Duration) -> Result<(), ArchiverError> {
        loop {
            let report = self.sweep().await?;
            if report != SweepReport::default() {
                info!(?report, "Archive sweep complete");
            }
            tokio::time::sleep(period).await;
        }
    }

    /// One pass over archivable tasks and pending notifications.
    pub async fn sweep(&self) -> Result<SweepReport, ArchiverError> {
        let mut report = SweepReport::default();

        let finished = self
            .catalog
            .get_tasks(TaskState::Finished, Limit::Unlimited)
            .await?;
        for task in finished {
            if self.archive_finished(&task).await? {
                report.archived += 1;
            } else {
                report.failed += 1;
            }
        }

        if self.storage.debug_mode() {
            report.debug_archived = self.archive_failed_for_debug().await?;
        }

        report.notified = self.drain_notifications().await?;
        Ok(report)
    }

    /// Returns whether the task reached ARCHIVED. Tasks taken by another
    /// archiver in the meantime count as not archived.
    ///
    /// Any error after ARCHIVING was entered rolls the task back to FINISHED
    /// before it is returned.
    async fn archive_finished(&self, task: &Task) -> Result<bool, ArchiverError> {
        let task = match self.catalog.begin_archiving(&task.task_id).await {
            Ok(task) => task,
            Err(CatalogError::LockContention(reason)) => {
                debug!(task_id = %task.task_id, reason = %reason, "Task no longer archivable");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        match self.complete_archive(&task).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.roll_back(&task.task_id, "Failed to archive task to permanent storage")
                    .await?;
                warn!(task_id = %task.task_id, "Archive failed; task returned to finished");
                Ok(false)
            }
            Err(e) => {
                let reason = format!("Archive aborted: {e}");
                if let Err(rollback) = self.roll_back(&task.task_id, &reason).await {
                    error!(
                        task_id = %task.task_id,
                        error = %rollback,
                        "Rollback failed; task stays archiving until the next restart"
                    );
                }
                Err(e)
            }
        }
    }

    /// Upload and commit ARCHIVED. `Ok(false)` when the upload failed.
    async fn complete_archive(&self, task: &Task) -> Result<bool, ArchiverError> {
        self.catalog
            .add_timestamp(&task.task_id, TaskState::Archiving, Utc::now())
            .await?;

        if !self.storage.archive(task).await {
            return Ok(false);
        }

        self.catalog
            .transition(&task.task_id, TaskState::Archiving, TaskState::Archived, None)
            .await?;
        self.catalog
            .add_timestamp(&task.task_id, TaskState::Archived, Utc::now())
            .await?;

        let local_dir = self.storage.local_task_dir(&task.task_id);
        match tokio::fs::remove_dir_all(&local_dir).await {
            Ok(()) => debug!(task_id = %task.task_id, "Local staging removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(task_id = %task.task_id, error = %e, "Could not remove local staging"),
        }
        Ok(true)
    }

    /// ARCHIVING -> FINISHED with `reason` as the task error. Returns whether
    /// the task was still ARCHIVING.
    async fn roll_back(&self, task_id: &str, reason: &str) -> Result<bool, ArchiverError> {
        let moved = self
            .catalog
            .transition(task_id, TaskState::Archiving, TaskState::Finished, Some(reason))
            .await?;
        if moved {
            self.catalog
                .add_timestamp(task_id, TaskState::Finished, Utc::now())
                .await?;
        }
        Ok(moved)
    }

    /// Archive FAILED tasks to the debug root once. They stay FAILED; an
    /// incomplete attempt is recorded in the status and not repeated.
    async fn archive_failed_for_debug(&self) -> Result<usize, ArchiverError> {
        let failed = self
            .catalog
            .get_tasks(TaskState::Failed, Limit::Unlimited)
            .await?;

        let mut archived = 0;
        for mut task in failed {
            if task.status == STATUS_DEBUG_ARCHIVED || task.status == STATUS_DEBUG_ARCHIVE_FAILED {
                continue;
            }
            if self.storage.archive(&task).await {
                task.status = STATUS_DEBUG_ARCHIVED.to_string();
                archived += 1;
            } else {
                warn!(task_id = %task.task_id, "Debug archive of failed task incomplete; not retried");
                task.status = STATUS_DEBUG_ARCHIVE_FAILED.to_string();
            }
            self.catalog.update_state(&task).await?;
        }
        Ok(archived)
    }

    /// Deliver wards whose task is ARCHIVED. Wards of notifiable users are
    /// removed after delivery, wards of other users are dropped.
    async fn drain_notifications(&self) -> Result<usize, ArchiverError> {
        let wards = self.catalog.get_users_to_notify().await?;

        let mut delivered = 0;
        for ward in wards {
            let Some(task) = self.catalog.get_task(&ward.task_id).await? else {
                warn!(task_id = %ward.task_id, "Dropping notification for unknown task");
                self.catalog.remove_notification(&ward).await?;
                continue;
            };
            if task.state != TaskState::Archived {
                continue;
            }

            if self.catalog.is_user_notifiable(&ward.user_email).await? {
                if let Err(e) = self.sink.notify(&ward, &task).await {
                    error!(task_id = %task.task_id, user = %ward.user_email, error = %e, "Notification failed");
                    continue;
                }
                delivered += 1;
            }
            self.catalog.remove_notification(&ward).await?;
        }
        Ok(delivered)
    }
}
