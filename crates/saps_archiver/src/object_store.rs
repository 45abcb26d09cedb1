//! Object-store client interface and its adapters.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::token::TokenProvider;

/// Typed object-store operations used by [`PermanentStorage`](crate::PermanentStorage).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_container(&self, container: &str) -> Result<()>;

    /// Upload `local` as `remote_path`, replacing any existing object.
    async fn upload(&self, container: &str, local: &Path, remote_path: &str) -> Result<()>;

    async fn delete(&self, container: &str, remote_path: &str) -> Result<()>;

    async fn list_with_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>>;
}

// ============================================================================
// Swift CLI adapter
// ============================================================================

/// Subprocess adapter around the OpenStack `swift` client.
///
/// Every call authenticates with the provider's current token against the
/// configured storage URL.
pub struct SwiftCliStore {
    bin: String,
    storage_url: String,
    token: Arc<dyn TokenProvider>,
}

impl SwiftCliStore {
    pub fn new(bin: impl Into<String>, storage_url: impl Into<String>, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            bin: bin.into(),
            storage_url: storage_url.into(),
            token,
        }
    }

    fn args(&self, token: &str, operation: &[&str]) -> Vec<String> {
        let mut args = vec![
            "--os-auth-token".to_string(),
            token.to_string(),
            "--os-storage-url".to_string(),
            self.storage_url.clone(),
        ];
        args.extend(operation.iter().map(|s| s.to_string()));
        args
    }

    async fn run(&self, operation: &[&str]) -> Result<String> {
        let token = self
            .token
            .current()
            .ok_or_else(|| StorageError::Token("no storage token available".into()))?;

        debug!(command = %format!("{} {}", self.bin, operation.join(" ")), "Running swift");
        let output = Command::new(&self.bin)
            .args(self.args(&token, operation))
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            // The token is never echoed back into errors or logs.
            return Err(StorageError::Command {
                command: format!("{} {}", self.bin, operation.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ObjectStore for SwiftCliStore {
    async fn create_container(&self, container: &str) -> Result<()> {
        self.run(&["post", container]).await.map(|_| ())
    }

    async fn upload(&self, container: &str, local: &Path, remote_path: &str) -> Result<()> {
        let local = local.to_string_lossy().into_owned();
        self.run(&["upload", container, local.as_str(), "--object-name", remote_path])
            .await
            .map(|_| ())
    }

    async fn delete(&self, container: &str, remote_path: &str) -> Result<()> {
        self.run(&["delete", container, remote_path]).await.map(|_| ())
    }

    async fn list_with_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let stdout = self.run(&["list", "-p", prefix, container]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

// ============================================================================
// In-memory adapter
// ============================================================================

#[derive(Default)]
struct MemoryState {
    /// container -> object path -> size in bytes
    containers: HashMap<String, BTreeMap<String, u64>>,
    /// Remote paths of every upload attempt, in order
    upload_attempts: Vec<String>,
    /// (path substring, remaining failures)
    upload_failures: Vec<(String, u32)>,
    fail_listing: bool,
}

/// In-process object store for dry runs and tests.
///
/// Uploads read the local file so missing sources fail like a real client.
#[derive(Default, Clone)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` uploads whose remote path contains `pattern`.
    pub fn fail_uploads(&self, pattern: impl Into<String>, times: u32) {
        self.with_state(|s| s.upload_failures.push((pattern.into(), times)));
    }

    pub fn fail_listing(&self, fail: bool) {
        self.with_state(|s| s.fail_listing = fail);
    }

    /// Object paths currently stored in `container`, sorted.
    pub fn objects(&self, container: &str) -> Vec<String> {
        self.with_state(|s| {
            s.containers
                .get(container)
                .map(|objects| objects.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn upload_attempts(&self) -> Vec<String> {
        self.with_state(|s| s.upload_attempts.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn missing_container(container: &str) -> StorageError {
        StorageError::Command {
            command: format!("memory {container}"),
            code: Some(1),
            stderr: format!("Container '{container}' not found"),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_container(&self, container: &str) -> Result<()> {
        self.with_state(|s| {
            s.containers.entry(container.to_string()).or_default();
        });
        Ok(())
    }

    async fn upload(&self, container: &str, local: &Path, remote_path: &str) -> Result<()> {
        let size = tokio::fs::metadata(local).await?.len();

        self.with_state(|s| {
            s.upload_attempts.push(remote_path.to_string());

            if let Some(entry) = s
                .upload_failures
                .iter_mut()
                .find(|(pattern, remaining)| *remaining > 0 && remote_path.contains(pattern.as_str()))
            {
                entry.1 -= 1;
                return Err(StorageError::Command {
                    command: format!("memory upload {remote_path}"),
                    code: Some(1),
                    stderr: "injected upload failure".into(),
                });
            }

            let objects = s
                .containers
                .get_mut(container)
                .ok_or_else(|| Self::missing_container(container))?;
            objects.insert(remote_path.to_string(), size);
            Ok(())
        })
    }

    async fn delete(&self, container: &str, remote_path: &str) -> Result<()> {
        self.with_state(|s| {
            let objects = s
                .containers
                .get_mut(container)
                .ok_or_else(|| Self::missing_container(container))?;
            objects.remove(remote_path);
            Ok(())
        })
    }

    async fn list_with_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        self.with_state(|s| {
            if s.fail_listing {
                return Err(StorageError::Command {
                    command: format!("memory list {prefix}"),
                    code: Some(1),
                    stderr: "injected listing failure".into(),
                });
            }
            let objects = s
                .containers
                .get(container)
                .ok_or_else(|| Self::missing_container(container))?;
            Ok(objects
                .keys()
                .filter(|path| path.starts_with(prefix))
                .cloned()
                .collect())
        })
    }
}
