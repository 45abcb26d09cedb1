//! Task catalog for the SAPS processing pipeline.
//!
//! The catalog is the single source of truth for task state. Every process
//! in a deployment (one crawler per federation member, the archiver, any
//! number of readers) talks to the same store; isolation comes from the
//! store itself, so the only client-side exclusion is the explicit claim
//! transition.
//!
//! # Usage
//!
//! ```rust,ignore
//! use saps_catalog::{Catalog, Limit, TaskState};
//!
//! let catalog = Catalog::open_in("/var/lib/saps/catalog.sqlite").await?;
//! let pending = catalog.get_tasks_in_state(TaskState::NotDownloaded, Limit::At(2)).await?;
//! for task in pending {
//!     if catalog.try_lock_task(&task.task_id, "site-a").await? {
//!         catalog.claim_task(&task.task_id, "site-a").await?;
//!     }
//! }
//! ```

mod error;
mod schema;
mod types;

// Operations organized by entity
mod audit;
mod claim;
mod deploy;
mod provenance;
mod tasks;
mod users;

pub mod retry;
pub mod retrying;

pub use error::{CatalogError, Result};
pub use retry::{RetryExecutor, RetryPolicy, Retryable};
pub use retrying::RetryingCatalog;
pub use types::*;

use saps_config::CatalogSection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Connection settings for [`Catalog::open`].
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for a single statement.
    pub query_timeout: Duration,
    /// How long SQLite waits on a locked database before reporting BUSY.
    pub busy_timeout: Duration,
}

impl CatalogConfig {
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            url: format!("sqlite:{}", path.as_ref().display()),
            ..Self::from(&CatalogSection::default())
        }
    }
}

impl From<&CatalogSection> for CatalogConfig {
    fn from(section: &CatalogSection) -> Self {
        Self {
            url: section.url.clone(),
            max_connections: section.max_connections.max(1),
            min_connections: section.min_connections.max(1),
            query_timeout: Duration::from_secs(section.query_timeout_secs),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the task catalog. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
    query_timeout: Duration,
}

impl Catalog {
    /// Open (creating if needed) the catalog described by `config`.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(config: CatalogConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        // Ensure parent directory exists
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(config.min_connections))
            .min_connections(config.min_connections)
            .acquire_timeout(config.query_timeout)
            .connect_with(options)
            .await?;

        let catalog = Self {
            pool,
            query_timeout: config.query_timeout,
        };
        catalog.ensure_schema().await?;

        info!(url = %config.url, "Catalog opened");
        Ok(catalog)
    }

    /// Open a file-backed catalog with default pool settings.
    pub async fn open_in(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(CatalogConfig::for_path(path)).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Close the pool. Further calls fail with a permanent error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run one catalog call under the query timeout.
    pub(crate) async fn timed<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        CatalogError: From<E>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result.map_err(CatalogError::from),
            Err(_) => Err(CatalogError::Timeout(self.query_timeout)),
        }
    }
}

// Timestamp utilities
impl Catalog {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("catalog.sqlite");

        let catalog = Catalog::open_in(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert_eq!(catalog.query_timeout(), Duration::from_secs(300));

        catalog.close().await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("catalog.sqlite");

        let first = Catalog::open_in(&db_path).await.unwrap();
        first.close().await;

        let second = Catalog::open_in(&db_path).await.unwrap();
        assert!(second.get_all_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_is_not_transient() {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::open_in(tmp.path().join("catalog.sqlite")).await.unwrap();
        catalog.close().await;

        let err = catalog.get_all_tasks().await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_config_from_section() {
        let section = CatalogSection {
            url: "sqlite:/tmp/x.sqlite".into(),
            max_connections: 3,
            min_connections: 0,
            query_timeout_secs: 10,
        };
        let config = CatalogConfig::from(&section);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.query_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = Catalog::now_millis();
        assert_eq!(Catalog::millis_to_datetime(now).timestamp_millis(), now);
    }
}
