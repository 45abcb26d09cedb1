//! Shared logging setup for the SAPS binaries.
//!
//! Every binary logs to stderr and to its own file under the configured
//! logs directory: `saps-crawler.log`, `saps-archiver.log`. When the live
//! file would grow past `max_file_bytes` it becomes `{name}.1.log`, older
//! generations shift up by one and the one past `keep_files` is dropped.

use anyhow::{Context, Result};
use saps_config::LoggingSection;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const VERBOSE_DIRECTIVES: &str = "saps_catalog=debug,saps_archiver=debug,saps_crawler=debug";

pub struct LogConfig<'a> {
    /// Binary name; also the log file stem.
    pub app_name: &'a str,
    /// Debug-level console output for the SAPS crates.
    pub verbose: bool,
    pub settings: &'a LoggingSection,
}

/// Install the global subscriber. Fails when one is already installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let settings = config.settings;
    settings.validate()?;

    let dir = settings.dir();
    let log = RotatingLog::open(&dir, config.app_name, settings.keep_files, settings.max_file_bytes)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    let console_filter = if config.verbose {
        EnvFilter::new(format!("{},{VERBOSE_DIRECTIVES}", settings.filter))
    } else {
        file_filter.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Size-capped log file of one binary.
struct RotatingLog {
    dir: PathBuf,
    stem: String,
    keep_files: usize,
    max_file_bytes: u64,
    file: File,
    written: u64,
}

impl RotatingLog {
    /// Appends to an existing live file.
    fn open(dir: &Path, stem: &str, keep_files: usize, max_file_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(generation_path(dir, stem, 0))?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            keep_files,
            max_file_bytes,
            file,
            written,
        })
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;

        // rename() replaces the target, so the oldest generation falls off
        for generation in (0..self.keep_files).rev() {
            let from = generation_path(&self.dir, &self.stem, generation);
            match fs::rename(&from, generation_path(&self.dir, &self.stem, generation + 1)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if self.keep_files == 0 {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        self.file = options.open(generation_path(&self.dir, &self.stem, 0))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // An oversized record still lands whole in a fresh file
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_bytes {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `{stem}.log` for the live file, `{stem}.{n}.log` for rotated ones.
fn generation_path(dir: &Path, stem: &str, generation: usize) -> PathBuf {
    if generation == 0 {
        dir.join(format!("{stem}.log"))
    } else {
        dir.join(format!("{stem}.{generation}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LINE: &[u8] = b"0123456789abc\n";

    #[test]
    fn test_rotation_keeps_configured_generations() {
        let tmp = TempDir::new().unwrap();
        let mut log = RotatingLog::open(tmp.path(), "saps-archiver", 2, 16).unwrap();
        for _ in 0..10 {
            log.write_all(LINE).unwrap();
        }
        log.flush().unwrap();

        for name in ["saps-archiver.log", "saps-archiver.1.log", "saps-archiver.2.log"] {
            assert_eq!(fs::read(tmp.path().join(name)).unwrap(), LINE, "{name}");
        }
        assert!(!tmp.path().join("saps-archiver.3.log").exists());
    }

    #[test]
    fn test_binaries_do_not_share_files() {
        let tmp = TempDir::new().unwrap();
        let mut crawler = RotatingLog::open(tmp.path(), "saps-crawler", 1, 1024).unwrap();
        let mut archiver = RotatingLog::open(tmp.path(), "saps-archiver", 1, 1024).unwrap();
        crawler.write_all(b"crawler\n").unwrap();
        archiver.write_all(b"archiver\n").unwrap();

        assert_eq!(fs::read(tmp.path().join("saps-crawler.log")).unwrap(), b"crawler\n");
        assert_eq!(fs::read(tmp.path().join("saps-archiver.log")).unwrap(), b"archiver\n");
    }

    #[test]
    fn test_reopen_counts_existing_bytes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("saps-crawler.log"), b"0123456789\n").unwrap();

        let mut log = RotatingLog::open(tmp.path(), "saps-crawler", 1, 16).unwrap();
        log.write_all(b"next\n").unwrap();
        log.write_all(b"overflow\n").unwrap();
        log.flush().unwrap();

        assert_eq!(
            fs::read(tmp.path().join("saps-crawler.1.log")).unwrap(),
            b"0123456789\nnext\n"
        );
        assert_eq!(fs::read(tmp.path().join("saps-crawler.log")).unwrap(), b"overflow\n");
    }

    #[test]
    fn test_zero_keep_truncates_in_place() {
        let tmp = TempDir::new().unwrap();
        let mut log = RotatingLog::open(tmp.path(), "saps-crawler", 0, 16).unwrap();
        log.write_all(LINE).unwrap();
        log.write_all(b"last\n").unwrap();
        log.flush().unwrap();

        assert_eq!(fs::read(tmp.path().join("saps-crawler.log")).unwrap(), b"last\n");
        assert!(!tmp.path().join("saps-crawler.1.log").exists());
    }
}
