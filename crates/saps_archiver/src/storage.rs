//! Permanent storage of a task's staged artifacts.
//!
//! A task's local staging area holds one directory per phase:
//!
//! ```text
//! {local_root}/{task_id}/inputdownloading/
//! {local_root}/{task_id}/preprocessing/
//! {local_root}/{task_id}/processing/
//! ```
//!
//! Each is mirrored remotely as `{remote_root}/{task_id}/{phase}/{file}`.
//! Phases are archived in that order and a phase is only attempted once the
//! previous one is fully uploaded.

use saps_catalog::{Task, TaskState};
use saps_config::{ArchiverSection, StorageSection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StorageError};
use crate::object_store::ObjectStore;

/// Processing stage whose output directory is archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagePhase {
    InputDownloading,
    Preprocessing,
    Processing,
}

impl StagePhase {
    /// Archive order.
    pub const ALL: [StagePhase; 3] = [Self::InputDownloading, Self::Preprocessing, Self::Processing];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::InputDownloading => "inputdownloading",
            Self::Preprocessing => "preprocessing",
            Self::Processing => "processing",
        }
    }
}

impl std::fmt::Display for StagePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Settings for [`PermanentStorage`], resolved from configuration.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub container: String,
    pub tasks_root: String,
    /// Set only when debug routing is active.
    pub debug_root: Option<String>,
    pub local_root: PathBuf,
    /// Attempts per file upload.
    pub upload_tries: u32,
    /// Attempts per phase directory.
    pub archive_tries: u32,
}

impl StorageSettings {
    pub fn from_config(storage: &StorageSection, archiver: &ArchiverSection) -> Result<Self> {
        storage
            .validate()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            container: storage.container.clone(),
            tasks_root: storage.tasks_folder.clone(),
            debug_root: storage.debug_root().map(str::to_string),
            local_root: archiver.temp_storage_path.clone(),
            upload_tries: storage.upload_tries,
            archive_tries: storage.archive_tries,
        })
    }
}

pub struct PermanentStorage {
    settings: StorageSettings,
    store: Arc<dyn ObjectStore>,
}

impl PermanentStorage {
    /// Create the storage, ensuring the container exists.
    pub async fn new(settings: StorageSettings, store: Arc<dyn ObjectStore>) -> Result<Self> {
        store.create_container(&settings.container).await?;
        info!(container = %settings.container, root = %settings.tasks_root, "Permanent storage ready");
        Ok(Self { settings, store })
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub fn debug_mode(&self) -> bool {
        self.settings.debug_root.is_some()
    }

    /// Failed tasks go to the debug root while debug routing is on.
    pub fn remote_root(&self, task: &Task) -> &str {
        match (&self.settings.debug_root, task.state) {
            (Some(debug_root), TaskState::Failed) => debug_root,
            _ => &self.settings.tasks_root,
        }
    }

    pub fn local_task_dir(&self, task_id: &str) -> PathBuf {
        self.settings.local_root.join(task_id)
    }

    /// Upload all three phase directories, in order.
    ///
    /// Returns false as soon as a phase fails. Objects uploaded before the
    /// failure stay in place and are overwritten by a later attempt.
    pub async fn archive(&self, task: &Task) -> bool {
        let root = self.remote_root(task).to_string();
        info!(task_id = %task.task_id, root = %root, "Archiving task");

        for phase in StagePhase::ALL {
            if let Err(e) = self.archive_phase(task, phase, &root).await {
                error!(task_id = %task.task_id, phase = %phase, error = %e, "Archive failed");
                return false;
            }
        }

        info!(task_id = %task.task_id, "Task archived");
        true
    }

    async fn archive_phase(&self, task: &Task, phase: StagePhase, root: &str) -> Result<()> {
        let local_dir = self.local_task_dir(&task.task_id).join(phase.dir_name());
        let remote_prefix = format!("{}/{}/{}", root, task.task_id, phase.dir_name());

        let tries = self.settings.archive_tries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upload_dir(&local_dir, &remote_prefix).await {
                Ok(count) => {
                    debug!(task_id = %task.task_id, phase = %phase, files = count, "Phase uploaded");
                    return Ok(());
                }
                // A missing stage means the phase never ran; retrying cannot help.
                Err(e @ StorageError::MissingDirectory(_)) => return Err(e),
                Err(e) if attempt >= tries => return Err(e),
                Err(e) => {
                    warn!(task_id = %task.task_id, phase = %phase, attempt, error = %e, "Retrying phase upload");
                }
            }
        }
    }

    /// Upload every regular file of `dir`. Returns the number of files.
    async fn upload_dir(&self, dir: &Path, remote_prefix: &str) -> Result<usize> {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(StorageError::MissingDirectory(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            } else {
                debug!(path = %entry.path().display(), "Skipping non-file entry");
            }
        }
        files.sort();

        for file in &files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.upload_file(file, &format!("{remote_prefix}/{name}")).await?;
        }
        Ok(files.len())
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<()> {
        let tries = self.settings.upload_tries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=tries {
            match self.store.upload(&self.settings.container, local, remote).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(remote, attempt, error = %e, "Upload attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(StorageError::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            attempts: tries,
            message: last_error,
        })
    }

    /// Best-effort removal of every remote object of the task.
    ///
    /// A listing failure is treated as an empty listing. Individual delete
    /// failures are logged and skipped. Always returns true.
    pub async fn delete(&self, task: &Task) -> bool {
        let prefix = format!("{}/{}/", self.remote_root(task), task.task_id);

        let objects = match self
            .store
            .list_with_prefix(&self.settings.container, &prefix)
            .await
        {
            Ok(objects) => objects,
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Listing failed; nothing deleted");
                Vec::new()
            }
        };

        for object in &objects {
            if let Err(e) = self.store.delete(&self.settings.container, object).await {
                warn!(task_id = %task.task_id, object = %object, error = %e, "Delete failed");
            }
        }

        info!(task_id = %task.task_id, objects = objects.len(), "Remote task data deleted");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use chrono::{NaiveDate, Utc};
    use saps_catalog::{PhaseImage, NONE};
    use tempfile::TempDir;

    fn task(id: &str, state: TaskState) -> Task {
        Task {
            task_id: id.into(),
            dataset: "landsat_8".into(),
            region: "215065".into(),
            image_date: NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
            state,
            job_id: NONE.into(),
            federation_member: NONE.into(),
            priority: 0,
            user_email: "u@saps".into(),
            input_downloading: PhaseImage::default(),
            preprocessing: PhaseImage::default(),
            processing: PhaseImage::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: "available".into(),
            error: None,
        }
    }

    fn settings(local_root: &Path, debug_root: Option<&str>) -> StorageSettings {
        StorageSettings {
            container: "saps".into(),
            tasks_root: "archiver".into(),
            debug_root: debug_root.map(str::to_string),
            local_root: local_root.to_path_buf(),
            upload_tries: 2,
            archive_tries: 1,
        }
    }

    #[tokio::test]
    async fn test_remote_root_routing() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new());

        let normal = PermanentStorage::new(settings(tmp.path(), None), store.clone())
            .await
            .unwrap();
        assert_eq!(normal.remote_root(&task("t1", TaskState::Failed)), "archiver");

        let debug = PermanentStorage::new(settings(tmp.path(), Some("debug")), store)
            .await
            .unwrap();
        assert_eq!(debug.remote_root(&task("t1", TaskState::Failed)), "debug");
        assert_eq!(debug.remote_root(&task("t1", TaskState::Finished)), "archiver");
    }

    #[test]
    fn test_settings_from_config_validates() {
        let storage = StorageSection {
            debug_mode: true,
            ..StorageSection::default()
        };
        let result = StorageSettings::from_config(&storage, &ArchiverSection::default());
        assert!(matches!(result, Err(StorageError::Config(_))));

        let storage = StorageSection {
            debug_mode: true,
            debug_tasks_folder: Some("debug".into()),
            ..StorageSection::default()
        };
        let settings = StorageSettings::from_config(&storage, &ArchiverSection::default()).unwrap();
        assert_eq!(settings.debug_root.as_deref(), Some("debug"));
        assert_eq!(settings.upload_tries, 2);
    }

    #[test]
    fn test_phase_order() {
        let names: Vec<_> = StagePhase::ALL.iter().map(|p| p.dir_name()).collect();
        assert_eq!(names, ["inputdownloading", "preprocessing", "processing"]);
    }
}
