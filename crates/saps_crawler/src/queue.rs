//! Crash-durable queue of claimed but unconfirmed downloads.
//!
//! The queue is a JSON map `task_id -> Task` rewritten atomically on every
//! change (temp file, fsync, rename). An exclusive `fs2` lock on a sidecar
//! `.lock` file is held for the queue's lifetime, so a queue file is never
//! shared between processes.

use fs2::FileExt;
use saps_catalog::Task;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CrawlerError, Result};

/// Lock file path for a queue file.
///
/// `/data/pending.json` → `/data/pending.json.lock`
pub fn lock_path_for(queue_path: &Path) -> PathBuf {
    let mut lock_path = queue_path.to_path_buf();
    match lock_path.extension() {
        Some(ext) => {
            let new_ext = format!("{}.lock", ext.to_string_lossy());
            lock_path.set_extension(new_ext);
        }
        None => {
            lock_path.set_extension("lock");
        }
    }
    lock_path
}

/// Holds the exclusive lock; released when dropped.
struct QueueLockGuard {
    _file: File,
    lock_path: PathBuf,
}

impl Drop for QueueLockGuard {
    fn drop(&mut self) {
        // File is unlocked when closed
        debug!("Releasing pending queue lock: {}", self.lock_path.display());
    }
}

fn try_lock_exclusive(queue_path: &Path) -> Result<QueueLockGuard> {
    let lock_path = lock_path_for(queue_path);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| CrawlerError::queue(&lock_path, e))?;

    // fs2's method, not the std one added in newer toolchains
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(QueueLockGuard { _file: file, lock_path }),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(CrawlerError::QueueLocked(queue_path.to_path_buf())),
        Err(e) => Err(CrawlerError::queue(&lock_path, e)),
    }
}

pub struct PendingQueue {
    path: PathBuf,
    entries: BTreeMap<String, Task>,
    _lock: QueueLockGuard,
}

impl PendingQueue {
    /// Lock and load the queue at `path`, creating it when absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CrawlerError::queue(parent, e))?;
            }
        }

        let lock = try_lock_exclusive(&path)?;

        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CrawlerError::QueueFormat {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CrawlerError::queue(&path, e)),
        };

        info!(path = %path.display(), pending = entries.len(), "Pending download queue opened");
        Ok(Self {
            path,
            entries,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.entries.get(task_id)
    }

    /// Snapshot of all entries, ordered by task id.
    pub fn tasks(&self) -> Vec<Task> {
        self.entries.values().cloned().collect()
    }

    /// Record a claim. Durable when this returns.
    pub async fn insert(&mut self, task: Task) -> Result<()> {
        let previous = self.entries.insert(task.task_id.clone(), task.clone());
        if let Err(e) = self.persist().await {
            match previous {
                Some(previous) => self.entries.insert(task.task_id.clone(), previous),
                None => self.entries.remove(&task.task_id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Drop an entry. Durable when this returns.
    pub async fn remove(&mut self, task_id: &str) -> Result<Option<Task>> {
        let Some(removed) = self.entries.remove(task_id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist().await {
            self.entries.insert(task_id.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Serialize here, write and fsync on the blocking pool.
    async fn persist(&self) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&self.entries).map_err(|source| CrawlerError::QueueFormat {
            path: self.path.clone(),
            source,
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &payload))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .and_then(|written| written)
            .map_err(|e| CrawlerError::queue(&self.path, e))
    }
}

/// Temp file, fsync, rename, then fsync the directory so the rename sticks.
fn write_atomically(path: &Path, payload: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(payload)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

impl std::fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("path", &self.path)
            .field("pending", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use saps_catalog::{PhaseImage, TaskState};
    use tempfile::TempDir;

    fn task(id: &str) -> Task {
        Task {
            task_id: id.into(),
            dataset: "landsat_8".into(),
            region: "215065".into(),
            image_date: NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
            state: TaskState::Downloading,
            job_id: "none".into(),
            federation_member: "site-a".into(),
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

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/data/pending.json")),
            PathBuf::from("/data/pending.json.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/pending")),
            PathBuf::from("/data/pending.lock")
        );
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pending.json");

        {
            let mut queue = PendingQueue::open(&path).unwrap();
            queue.insert(task("t1")).await.unwrap();
            queue.insert(task("t2")).await.unwrap();
            assert_eq!(queue.remove("t1").await.unwrap().unwrap().task_id, "t1");
            assert!(queue.remove("t1").await.unwrap().is_none());
        }

        let queue = PendingQueue::open(&path).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("t2"));
        assert_eq!(queue.get("t2").unwrap().state, TaskState::Downloading);
        assert_eq!(queue.tasks()[0].federation_member, "site-a");
        assert!(!tmp.path().join("pending.tmp").exists());
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pending.json");

        let first = PendingQueue::open(&path).unwrap();
        assert!(matches!(
            PendingQueue::open(&path),
            Err(CrawlerError::QueueLocked(_))
        ));

        drop(first);
        PendingQueue::open(&path).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pending.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            PendingQueue::open(&path),
            Err(CrawlerError::QueueFormat { .. })
        ));
    }

    #[test]
    fn test_empty_file_is_empty_queue() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pending.json");
        fs::write(&path, b"").unwrap();

        assert!(PendingQueue::open(&path).unwrap().is_empty());
    }
}
