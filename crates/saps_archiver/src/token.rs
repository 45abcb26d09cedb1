//! Bearer-token handling for the object store.
//!
//! The archiver only ever reads the current token. Obtaining and refreshing
//! it belongs to a [`TokenSource`] driven by [`RefreshingToken`].

use async_trait::async_trait;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

/// Read side of the credential.
pub trait TokenProvider: Send + Sync {
    fn current(&self) -> Option<String>;
}

/// Produces a fresh token on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Fixed token, for dry runs and deployments that inject one externally.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn current(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Runs a command and takes the first non-empty stdout line as the token.
#[derive(Debug, Clone)]
pub struct CommandTokenSource {
    command: Vec<String>,
}

impl CommandTokenSource {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(StorageError::Config("storage.token_command is empty".into()));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl TokenSource for CommandTokenSource {
    async fn fetch(&self) -> Result<String> {
        let output = Command::new(&self.command[0])
            .args(&self.command[1..])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(StorageError::Command {
                command: self.command.join(" "),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StorageError::Token("token command printed nothing".into()))
    }
}

/// Token kept fresh by a background task.
pub struct RefreshingToken {
    current: Arc<RwLock<Option<String>>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshingToken {
    /// Obtain the first token, then refresh it every `period`.
    ///
    /// Blocks until a token is available. Fails with `TokenTimeout` when
    /// none could be obtained within `timeout`.
    pub async fn start(source: Arc<dyn TokenSource>, period: Duration, timeout: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(StorageError::Config("token refresh period must be greater than zero".into()));
        }
        let first = tokio::time::timeout(timeout, async {
            loop {
                match source.fetch().await {
                    Ok(token) => break token,
                    Err(e) => {
                        warn!(error = %e, "Storage token not available yet");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
        .await
        .map_err(|_| StorageError::TokenTimeout(timeout))?;

        info!("Storage token acquired");
        let current = Arc::new(RwLock::new(Some(first)));

        let shared = Arc::clone(&current);
        let refresher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match source.fetch().await {
                    Ok(token) => {
                        if let Ok(mut guard) = shared.write() {
                            *guard = Some(token);
                        }
                        debug!("Storage token refreshed");
                    }
                    Err(e) => warn!(error = %e, "Storage token refresh failed; keeping previous token"),
                }
            }
        });

        Ok(Self {
            current,
            refresher: Mutex::new(Some(refresher)),
        })
    }

    /// Stop refreshing. The last token stays readable.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.refresher.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl TokenProvider for RefreshingToken {
    fn current(&self) -> Option<String> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }
}

impl Drop for RefreshingToken {
    fn drop(&mut self) {
        self.stop();
    }
}
