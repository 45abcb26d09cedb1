//! System configuration shared by the crawler and the archiver.
//!
//! Loaded from a single TOML file. Every field has a default so a partial
//! file (or none at all) yields a usable local setup; the per-section
//! `validate()` methods catch the values a deployment must set explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::defaults::*;
use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(String),

    #[error("Missing required setting: {0}")]
    Missing(String),
}

/// Canonical configuration used by every SAPS service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub archiver: ArchiverSection,
    #[serde(default)]
    pub crawler: CrawlerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Log file placement and rotation. Each binary writes its own file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Defaults to `$SAPS_HOME/logs`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Rotated files kept besides the live one; 0 truncates in place.
    #[serde(default = "default_log_keep_files")]
    pub keep_files: usize,
    #[serde(default = "default_log_max_file_bytes")]
    pub max_file_bytes: u64,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Connection settings for the task catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSection {
    /// Catalog URL (sqlite:/path/to/catalog.sqlite)
    #[serde(default = "default_catalog_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Bound on a single statement, not on the retry loop around it.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
    /// Absent means retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Permanent (object) storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_container")]
    pub container: String,
    /// Remote root for regular archives.
    #[serde(default = "default_tasks_folder")]
    pub tasks_folder: String,
    /// Remote root for failed tasks when `debug_mode` is on.
    #[serde(default)]
    pub debug_tasks_folder: Option<String>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub swift_url: String,
    #[serde(default = "default_swift_bin")]
    pub swift_bin: String,
    /// Command printing a fresh bearer token on stdout.
    #[serde(default)]
    pub token_command: Vec<String>,
    #[serde(default = "default_token_refresh")]
    pub token_refresh_secs: u64,
    #[serde(default = "default_token_timeout")]
    pub token_timeout_secs: u64,
    #[serde(default = "default_upload_tries")]
    pub upload_tries: u32,
    #[serde(default = "default_archive_tries")]
    pub archive_tries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverSection {
    /// Local staging root holding `{task_id}/{phase}/` directories.
    #[serde(default = "default_temp_storage_path")]
    pub temp_storage_path: PathBuf,
    #[serde(default = "default_archiver_period")]
    pub period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerSection {
    #[serde(default)]
    pub federation_member: String,
    /// Volume whose free space gates download admission.
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
    #[serde(default = "default_image_footprint")]
    pub image_footprint_bytes: u64,
    #[serde(default = "default_scheduler_period")]
    pub scheduler_period_secs: u64,
    #[serde(default = "paths::default_pending_queue_path")]
    pub pending_queue_path: PathBuf,
    /// Age after which finished result directories are purged.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default)]
    pub download_command: Vec<String>,
    #[serde(default)]
    pub postprocess_command: Vec<String>,
}

fn default_catalog_url() -> String {
    format!("sqlite:{}", paths::default_catalog_path().display())
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_min_connections() -> u32 {
    DEFAULT_MIN_CONNECTIONS
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_container() -> String {
    DEFAULT_CONTAINER.to_string()
}

fn default_tasks_folder() -> String {
    DEFAULT_TASKS_FOLDER.to_string()
}

fn default_swift_bin() -> String {
    DEFAULT_SWIFT_BIN.to_string()
}

fn default_token_refresh() -> u64 {
    DEFAULT_TOKEN_REFRESH_SECS
}

fn default_token_timeout() -> u64 {
    DEFAULT_TOKEN_TIMEOUT_SECS
}

fn default_upload_tries() -> u32 {
    DEFAULT_UPLOAD_TRIES
}

fn default_archive_tries() -> u32 {
    DEFAULT_ARCHIVE_TRIES
}

fn default_temp_storage_path() -> PathBuf {
    paths::saps_home().join("nfs")
}

fn default_archiver_period() -> u64 {
    DEFAULT_ARCHIVER_PERIOD_SECS
}

fn default_export_path() -> PathBuf {
    paths::saps_home().join("export")
}

fn default_image_footprint() -> u64 {
    DEFAULT_IMAGE_FOOTPRINT_BYTES
}

fn default_scheduler_period() -> u64 {
    DEFAULT_SCHEDULER_PERIOD_SECS
}

fn default_retention() -> u64 {
    DEFAULT_RETENTION_SECS
}

fn default_log_keep_files() -> usize {
    DEFAULT_LOG_KEEP_FILES
}

fn default_log_max_file_bytes() -> u64 {
    DEFAULT_LOG_MAX_FILE_BYTES
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_attempts: None,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            container: default_container(),
            tasks_folder: default_tasks_folder(),
            debug_tasks_folder: None,
            debug_mode: false,
            swift_url: String::new(),
            swift_bin: default_swift_bin(),
            token_command: Vec::new(),
            token_refresh_secs: DEFAULT_TOKEN_REFRESH_SECS,
            token_timeout_secs: DEFAULT_TOKEN_TIMEOUT_SECS,
            upload_tries: DEFAULT_UPLOAD_TRIES,
            archive_tries: DEFAULT_ARCHIVE_TRIES,
        }
    }
}

impl Default for ArchiverSection {
    fn default() -> Self {
        Self {
            temp_storage_path: default_temp_storage_path(),
            period_secs: DEFAULT_ARCHIVER_PERIOD_SECS,
        }
    }
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            federation_member: String::new(),
            export_path: default_export_path(),
            image_footprint_bytes: DEFAULT_IMAGE_FOOTPRINT_BYTES,
            scheduler_period_secs: DEFAULT_SCHEDULER_PERIOD_SECS,
            pending_queue_path: paths::default_pending_queue_path(),
            retention_secs: DEFAULT_RETENTION_SECS,
            download_command: Vec::new(),
            postprocess_command: Vec::new(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            keep_files: DEFAULT_LOG_KEEP_FILES,
            max_file_bytes: DEFAULT_LOG_MAX_FILE_BYTES,
            filter: default_log_filter(),
        }
    }
}

impl SystemConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl StorageSection {
    /// Remote root for failed tasks, when debug routing is active.
    pub fn debug_root(&self) -> Option<&str> {
        if self.debug_mode {
            self.debug_tasks_folder.as_deref()
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container.trim().is_empty() {
            return Err(ConfigError::Missing("storage.container".into()));
        }
        if self.tasks_folder.trim().is_empty() {
            return Err(ConfigError::Missing("storage.tasks_folder".into()));
        }
        if self.debug_mode
            && self
                .debug_tasks_folder
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigError::Missing(
                "storage.debug_tasks_folder (required when debug_mode = true)".into(),
            ));
        }
        if self.upload_tries == 0 || self.archive_tries == 0 {
            return Err(ConfigError::Parse(
                "storage.upload_tries and storage.archive_tries must be at least 1".into(),
            ));
        }
        if self.token_refresh_secs == 0 {
            return Err(ConfigError::Parse(
                "storage.token_refresh_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl LoggingSection {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(paths::default_logs_dir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Parse(
                "logging.max_file_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl CrawlerSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.federation_member.trim().is_empty() {
            return Err(ConfigError::Missing("crawler.federation_member".into()));
        }
        if self.image_footprint_bytes == 0 {
            return Err(ConfigError::Parse(
                "crawler.image_footprint_bytes must be greater than zero".into(),
            ));
        }
        if self.download_command.is_empty() {
            return Err(ConfigError::Missing("crawler.download_command".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SystemConfig::default();
        assert!(config.catalog.url.starts_with("sqlite:"));
        assert_eq!(config.catalog.min_connections, 1);
        assert_eq!(config.catalog.query_timeout_secs, 300);
        assert_eq!(config.retry.delay_secs, 5);
        assert!(config.retry.max_attempts.is_none());
        assert_eq!(config.storage.upload_tries, 2);
        assert_eq!(config.storage.archive_tries, 1);
        assert_eq!(config.crawler.image_footprint_bytes, 356 * 1024 * 1024);
        assert_eq!(config.crawler.scheduler_period_secs, 300);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SystemConfig::from_toml(
            r#"
            [crawler]
            federation_member = "lsd"
            download_command = ["fetch", "{task_id}"]

            [storage]
            debug_mode = true
            debug_tasks_folder = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.federation_member, "lsd");
        assert_eq!(config.crawler.scheduler_period_secs, 300);
        assert_eq!(config.storage.debug_root(), Some("debug"));
        assert_eq!(config.storage.tasks_folder, "archiver");
        config.crawler.validate().unwrap();
        config.storage.validate().unwrap();
    }

    #[test]
    fn test_debug_mode_requires_debug_folder() {
        let storage = StorageSection {
            debug_mode: true,
            ..StorageSection::default()
        };
        assert!(matches!(storage.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_zero_token_refresh_rejected() {
        let storage = StorageSection {
            token_refresh_secs: 0,
            ..StorageSection::default()
        };
        assert!(matches!(storage.validate(), Err(ConfigError::Parse(_))));

        let config = SystemConfig::from_toml("[storage]\ntoken_refresh_secs = 0\n").unwrap();
        assert!(config.storage.validate().is_err());
    }

    #[test]
    fn test_logging_section() {
        let config = SystemConfig::from_toml(
            r#"
            [logging]
            dir = "/var/log/saps"
            keep_files = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.dir(), PathBuf::from("/var/log/saps"));
        assert_eq!(config.logging.keep_files, 2);
        assert_eq!(config.logging.max_file_bytes, 10 * 1024 * 1024);
        assert!(config.logging.filter.contains("saps_crawler=info"));

        let zero = LoggingSection {
            max_file_bytes: 0,
            ..LoggingSection::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_crawler_requires_federation_member() {
        let crawler = CrawlerSection {
            download_command: vec!["fetch".into()],
            ..CrawlerSection::default()
        };
        assert!(matches!(crawler.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SystemConfig::load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.archiver.period_secs, 60);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = SystemConfig::default();
        config.crawler.federation_member = "site-a".into();
        config.retry.max_attempts = Some(3);

        let toml_str = config.to_toml().unwrap();
        let parsed = SystemConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.crawler.federation_member, "site-a");
        assert_eq!(parsed.retry.max_attempts, Some(3));
    }
}
