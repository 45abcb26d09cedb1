//! SAPS crawler
//!
//! Usage:
//!     saps-crawler --config /etc/saps/config.toml
//!     saps-crawler --federation-member site-a --export-path /exports

use anyhow::Context;
use clap::Parser;
use saps_catalog::{Catalog, CatalogConfig, RetryExecutor, RetryPolicy, RetryingCatalog};
use saps_config::SystemConfig;
use saps_crawler::{CommandDownloader, Crawler, CrawlerSettings, PendingQueue, VolumeFreeSpace};
use saps_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "saps-crawler", about = "Claim and download SAPS tasks for one federation member")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = "SAPS_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides crawler.federation_member
    #[arg(long, env = "SAPS_FEDERATION_MEMBER")]
    federation_member: Option<String>,

    /// Overrides crawler.export_path
    #[arg(long)]
    export_path: Option<PathBuf>,

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
    let mut config = SystemConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_logging(LogConfig {
        app_name: "saps-crawler",
        verbose: args.verbose,
        settings: &config.logging,
    })?;

    if let Some(member) = args.federation_member {
        config.crawler.federation_member = member;
    }
    if let Some(export_path) = args.export_path {
        config.crawler.export_path = export_path;
    }

    let settings = CrawlerSettings::from_config(&config.crawler)?;
    let queue = PendingQueue::open(&config.crawler.pending_queue_path)?;
    let downloader = CommandDownloader::new(
        config.crawler.download_command.clone(),
        config.crawler.postprocess_command.clone(),
        settings.export_path.clone(),
    )?;
    let free_space = VolumeFreeSpace::new(settings.export_path.clone());

    let catalog = Catalog::open(CatalogConfig::from(&config.catalog))
        .await
        .context("Failed to open catalog")?;
    let retrying = RetryingCatalog::new(
        catalog.clone(),
        RetryExecutor::new(RetryPolicy::from(&config.retry)),
    );

    info!("Starting SAPS crawler");
    info!("  Config: {}", config_path.display());
    info!("  Member: {}", settings.federation_member);
    info!("  Export: {}", settings.export_path.display());
    info!("  Queue: {}", queue.path().display());

    let mut crawler = Crawler::new(settings, retrying, queue, Arc::new(downloader), Arc::new(free_space));

    let result = tokio::select! {
        result = crawler.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    catalog.close().await;
    result.context("Crawler stopped")
}
