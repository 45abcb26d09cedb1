//! Download scheduler loop.
//!
//! One `Crawler` runs per federation member. Claims go through the catalog
//! lock and the conditional claim transition; the pending queue is written
//! before the claim commits, so every claim this process ever made is either
//! confirmed (DOWNLOADED), rolled back, or still in the queue for
//! [`Crawler::recover`] to roll back after a crash.

use chrono::Utc;
use saps_catalog::{CatalogError, Limit, RetryingCatalog, Task, TaskState};
use saps_config::CrawlerSection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::capacity::{images_to_download, FreeSpace};
use crate::downloader::Downloader;
use crate::error::{CrawlerError, Result};
use crate::queue::PendingQueue;

/// Sub-directory of the export path holding per-task results.
pub const RESULTS_DIR: &str = "results";

#[derive(Debug, Clone)]
pub struct CrawlerSettings {
    pub federation_member: String,
    pub export_path: PathBuf,
    pub image_footprint_bytes: u64,
    pub scheduler_period: Duration,
    pub retention: Duration,
}

impl CrawlerSettings {
    pub fn from_config(section: &CrawlerSection) -> Result<Self> {
        section
            .validate()
            .map_err(|e| CrawlerError::FatalConfig(e.to_string()))?;
        Ok(Self {
            federation_member: section.federation_member.clone(),
            export_path: section.export_path.clone(),
            image_footprint_bytes: section.image_footprint_bytes,
            scheduler_period: Duration::from_secs(section.scheduler_period_secs),
            retention: Duration::from_secs(section.retention_secs),
        })
    }

    pub fn results_dir(&self, task_id: &str) -> PathBuf {
        self.export_path.join(RESULTS_DIR).join(task_id)
    }
}

/// Counters of one scheduling cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub purged: usize,
    pub capacity: u64,
    pub claimed: usize,
    pub downloaded: usize,
    pub failed: usize,
}

pub struct Crawler {
    settings: CrawlerSettings,
    catalog: RetryingCatalog,
    queue: PendingQueue,
    downloader: Arc<dyn Downloader>,
    free_space: Arc<dyn FreeSpace>,
}

impl Crawler {
    pub fn new(
        settings: CrawlerSettings,
        catalog: RetryingCatalog,
        queue: PendingQueue,
        downloader: Arc<dyn Downloader>,
        free_space: Arc<dyn FreeSpace>,
    ) -> Self {
        Self {
            settings,
            catalog,
            queue,
            downloader,
            free_space,
        }
    }

    pub fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Recover, then schedule until no claimable task remains.
    pub async fn run(&mut self) -> Result<()> {
        let recovered = self.recover().await?;
        info!(
            member = %self.settings.federation_member,
            recovered,
            "Crawler started"
        );

        loop {
            let remaining = self.catalog.count_in_states(&TaskState::CLAIMABLE).await?;
            if remaining == 0 {
                info!("No claimable tasks left; crawler stopping");
                return Ok(());
            }

            let report = self.run_cycle().await?;
            info!(?report, remaining, "Scheduling cycle complete");

            if report.claimed == 0 {
                debug!(period = ?self.settings.scheduler_period, "Nothing claimed; sleeping");
                tokio::time::sleep(self.settings.scheduler_period).await;
            }
        }
    }

    /// Roll back every download left in the queue by a previous run.
    ///
    /// Returns the number of queue entries processed.
    pub async fn recover(&mut self) -> Result<usize> {
        let member = self.settings.federation_member.clone();
        let pending = self.queue.tasks();

        for task in &pending {
            let released = self
                .catalog
                .release_claim(
                    &task.task_id,
                    &member,
                    Some("Download interrupted; rolled back on restart"),
                )
                .await?;
            if released {
                self.catalog
                    .add_timestamp(&task.task_id, TaskState::NotDownloaded, Utc::now())
                    .await?;
            }
            self.queue.remove(&task.task_id).await?;
            warn!(task_id = %task.task_id, released, "Recovered interrupted download");
        }

        let locks = self.catalog.release_locks_held_by(&member).await?;
        if locks > 0 {
            warn!(locks, member = %member, "Released stale task locks");
        }
        Ok(pending.len())
    }

    /// Purge, measure capacity, then claim and download what fits.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport {
            purged: self.purge_finished_results().await?,
            ..CycleReport::default()
        };

        let free = self.free_space.available()?;
        report.capacity = images_to_download(free, self.settings.image_footprint_bytes);
        if report.capacity == 0 {
            info!(free_bytes = free, "No capacity on the export volume");
            return Ok(report);
        }

        let claimed = self.claim(report.capacity).await?;
        report.claimed = claimed.len();
        for task in claimed {
            if self.download(task).await? {
                report.downloaded += 1;
            } else {
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// Claim up to `n` tasks and download each. Returns the number that
    /// reached DOWNLOADED.
    pub async fn claim_and_download(&mut self, n: u64) -> Result<usize> {
        let claimed = self.claim(n).await?;
        let mut downloaded = 0;
        for task in claimed {
            if self.download(task).await? {
                downloaded += 1;
            }
        }
        Ok(downloaded)
    }

    /// Remove local results of FINISHED tasks older than the retention.
    pub async fn purge_finished_results(&self) -> Result<usize> {
        let finished = self
            .catalog
            .get_tasks(TaskState::Finished, Limit::Unlimited)
            .await?;

        let now = Utc::now();
        let mut purged = 0;
        for task in finished {
            let age = (now - task.updated_at).to_std().unwrap_or_default();
            if age < self.settings.retention {
                continue;
            }
            let dir = self.settings.results_dir(&task.task_id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!(task_id = %task.task_id, path = %dir.display(), "Purged results");
                    purged += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(task_id = %task.task_id, error = %e, "Could not purge results"),
            }
        }
        Ok(purged)
    }

    /// Lock, queue, claim, unlock. Contended tasks are skipped.
    async fn claim(&mut self, n: u64) -> Result<Vec<Task>> {
        let member = self.settings.federation_member.clone();
        let limit = Limit::At(u32::try_from(n).unwrap_or(u32::MAX));
        let candidates = self
            .catalog
            .get_tasks_in_states(&TaskState::CLAIMABLE, limit)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let task_id = candidate.task_id.clone();
            if !self.catalog.try_lock_task(&task_id, &member).await? {
                debug!(task_id = %task_id, "Task locked by another member");
                continue;
            }

            let result = self.claim_locked(candidate, &member).await;
            self.catalog.unlock_task(&task_id, &member).await?;
            if let Some(task) = result? {
                claimed.push(task);
            }
        }
        Ok(claimed)
    }

    async fn claim_locked(&mut self, candidate: Task, member: &str) -> Result<Option<Task>> {
        let task_id = candidate.task_id.clone();
        let mut snapshot = candidate;
        snapshot.state = TaskState::Downloading;
        snapshot.federation_member = member.to_string();
        self.queue.insert(snapshot).await?;

        match self.catalog.claim_task(&task_id, member).await {
            Ok(task) => {
                self.catalog
                    .add_timestamp(&task_id, TaskState::Downloading, Utc::now())
                    .await?;
                Ok(Some(task))
            }
            Err(CatalogError::LockContention(reason)) | Err(CatalogError::NotFound(reason)) => {
                debug!(task_id = %task_id, reason = %reason, "Claim lost");
                self.queue.remove(&task_id).await?;
                Ok(None)
            }
            Err(e) => {
                // The claim may have committed; recover() settles the entry
                error!(task_id = %task_id, error = %e, "Claim outcome unknown; entry kept for recovery");
                Err(e.into())
            }
        }
    }

    /// Download and post-process a claimed task. Any failure rolls the task
    /// back to NOT_DOWNLOADED. The queue entry is removed either way.
    async fn download(&mut self, task: Task) -> Result<bool> {
        let member = self.settings.federation_member.clone();
        let outcome = match self.downloader.download(&task).await {
            Ok(()) => self.downloader.post_process(&task).await,
            Err(e) => Err(e),
        };

        let downloaded = match outcome {
            Ok(()) => {
                let moved = self
                    .catalog
                    .transition(&task.task_id, TaskState::Downloading, TaskState::Downloaded, None)
                    .await?;
                if moved {
                    self.catalog
                        .add_timestamp(&task.task_id, TaskState::Downloaded, Utc::now())
                        .await?;
                    info!(task_id = %task.task_id, "Task downloaded");
                } else {
                    warn!(task_id = %task.task_id, "Task left DOWNLOADING while being downloaded");
                }
                moved
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Download failed; rolling back");
                let message = e.to_string();
                if self
                    .catalog
                    .release_claim(&task.task_id, &member, Some(&message))
                    .await?
                {
                    self.catalog
                        .add_timestamp(&task.task_id, TaskState::NotDownloaded, Utc::now())
                        .await?;
                }
                false
            }
        };

        self.queue.remove(&task.task_id).await?;
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> CrawlerSection {
        CrawlerSection {
            federation_member: "site-a".into(),
            export_path: PathBuf::from("/exports"),
            image_footprint_bytes: 1,
            scheduler_period_secs: 300,
            pending_queue_path: PathBuf::from("/tmp/pending.json"),
            retention_secs: 60,
            download_command: vec!["true".into()],
            postprocess_command: vec![],
        }
    }

    #[test]
    fn test_settings_from_config() {
        let settings = CrawlerSettings::from_config(&section()).unwrap();
        assert_eq!(settings.scheduler_period, Duration::from_secs(300));
        assert_eq!(settings.retention, Duration::from_secs(60));
        assert_eq!(settings.results_dir("t1"), PathBuf::from("/exports/results/t1"));
    }

    #[test]
    fn test_missing_member_is_fatal() {
        let mut section = section();
        section.federation_member = " ".into();
        assert!(matches!(
            CrawlerSettings::from_config(&section),
            Err(CrawlerError::FatalConfig(_))
        ));
    }
}
