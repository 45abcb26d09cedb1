//! Shared configuration for the SAPS coordination services.
//!
//! Every binary (crawler, archiver) reads one `SystemConfig` from TOML and
//! hands the relevant section to each component constructor.

pub mod config;
pub mod defaults;
pub mod paths;

pub use config::{
    ArchiverSection, CatalogSection, ConfigError, CrawlerSection, LoggingSection, RetrySection, StorageSection,
    SystemConfig,
};
