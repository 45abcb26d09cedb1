//! SAPS archiver
//!
//! Usage:
//!     saps-archiver --config /etc/saps/config.toml
//!     saps-archiver --dry-run --once

use anyhow::Context;
use clap::Parser;
use saps_archiver::{
    Archiver, CommandTokenSource, LogSink, MemoryObjectStore, ObjectStore, PermanentStorage, RefreshingToken,
    StorageSettings, SwiftCliStore,
};
use saps_catalog::{Catalog, CatalogConfig, RetryExecutor, RetryPolicy, RetryingCatalog};
use saps_config::SystemConfig;
use saps_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "saps-archiver", about = "Archive finished SAPS tasks to permanent storage")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = "SAPS_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,

    /// Keep archives in memory instead of the object store
    #[arg(long)]
    dry_run: bool,

    /// Verbose console logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(saps_config::paths::default_config_path);
    let config = SystemConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_logging(LogConfig {
        app_name: "saps-archiver",
        verbose: args.verbose,
        settings: &config.logging,
    })?;

    let catalog = Catalog::open(CatalogConfig::from(&config.catalog))
        .await
        .context("Failed to open catalog")?;
    let retrying = RetryingCatalog::new(
        catalog.clone(),
        RetryExecutor::new(RetryPolicy::from(&config.retry)),
    );

    let settings = StorageSettings::from_config(&config.storage, &config.archiver)?;

    let mut token = None;
    let store: Arc<dyn ObjectStore> = if args.dry_run {
        info!("Dry run: archives are kept in memory");
        Arc::new(MemoryObjectStore::new())
    } else {
        let source = CommandTokenSource::new(config.storage.token_command.clone())?;
        let refreshing = Arc::new(
            RefreshingToken::start(
                Arc::new(source),
                Duration::from_secs(config.storage.token_refresh_secs),
                Duration::from_secs(config.storage.token_timeout_secs),
            )
            .await
            .context("Failed to obtain storage token")?,
        );
        token = Some(Arc::clone(&refreshing));
        Arc::new(SwiftCliStore::new(
            config.storage.swift_bin.clone(),
            config.storage.swift_url.clone(),
            refreshing,
        ))
    };

    let storage = PermanentStorage::new(settings, store)
        .await
        .context("Failed to prepare permanent storage")?;
    let archiver = Archiver::new(retrying, storage, Arc::new(LogSink));

    info!("Starting SAPS archiver");
    info!("  Config: {}", config_path.display());
    info!("  Staging: {}", config.archiver.temp_storage_path.display());

    let recovered = archiver.recover().await.context("Failed to recover interrupted archives")?;
    if recovered > 0 {
        info!(recovered, "Interrupted archives returned to finished");
    }

    let result = if args.once {
        archiver.sweep().await.map(|report| {
            info!(?report, "Sweep complete");
        })
    } else {
        tokio::select! {
            result = archiver.run(Duration::from_secs(config.archiver.period_secs)) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                Ok(())
            }
        }
    };

    if let Some(token) = token {
        token.stop();
    }
    catalog.close().await;

    result.context("Archiver stopped")
}
