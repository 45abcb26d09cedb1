//! Download scheduler for SAPS.
//!
//! Claims downloadable tasks for one federation member, records each claim
//! in a crash-durable local queue, throttles on free space of the export
//! volume and hands claimed tasks to an external downloader.

pub mod capacity;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod queue;

pub use capacity::{available_space, images_to_download, FreeSpace, VolumeFreeSpace};
pub use crawler::{Crawler, CrawlerSettings, CycleReport};
pub use downloader::{CommandDownloader, Downloader};
pub use error::{CrawlerError, Result};
pub use queue::PendingQueue;
