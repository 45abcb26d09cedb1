//! Canonical default values shared across the services.

/// Fixed delay between catalog retries.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Upper bound on a single catalog statement.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Attempts per file before the directory upload is reported as failed.
pub const DEFAULT_UPLOAD_TRIES: u32 = 2;

/// Attempts per stage directory inside one `archive()` call.
pub const DEFAULT_ARCHIVE_TRIES: u32 = 1;

pub const DEFAULT_TOKEN_REFRESH_SECS: u64 = 3600;
pub const DEFAULT_TOKEN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SWIFT_BIN: &str = "swift";
pub const DEFAULT_CONTAINER: &str = "saps";
pub const DEFAULT_TASKS_FOLDER: &str = "archiver";

pub const DEFAULT_ARCHIVER_PERIOD_SECS: u64 = 60;

/// Sleep between capacity checks when the volume is full (5 minutes).
pub const DEFAULT_SCHEDULER_PERIOD_SECS: u64 = 300;

/// On-disk footprint reserved per downloaded image (356 MiB).
pub const DEFAULT_IMAGE_FOOTPRINT_BYTES: u64 = 356 * 1024 * 1024;

pub const DEFAULT_RETENTION_SECS: u64 = 0;
pub const DEFAULT_PENDING_QUEUE_FILE: &str = "pending-image-download.json";

/// Rotated generations kept next to the live log file.
pub const DEFAULT_LOG_KEEP_FILES: usize = 4;

/// Size at which the live log file is rotated (10 MiB).
pub const DEFAULT_LOG_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_LOG_FILTER: &str = "saps_catalog=info,saps_archiver=info,saps_crawler=info";
