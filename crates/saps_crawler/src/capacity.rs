//! Local volume capacity: how many images fit before the scheduler sleeps.

use std::path::{Path, PathBuf};

use crate::error::{CrawlerError, Result};

/// `floor(free / footprint)`. A zero footprint admits nothing.
pub fn images_to_download(free_bytes: u64, footprint_bytes: u64) -> u64 {
    if footprint_bytes == 0 {
        return 0;
    }
    free_bytes / footprint_bytes
}

/// Free bytes on the volume holding `path`.
///
/// A missing path or a path that is not a directory is a configuration
/// error, never "no space".
pub fn available_space(path: &Path) -> Result<u64> {
    if !path.is_dir() {
        return Err(CrawlerError::FatalConfig(format!(
            "export path {} does not exist or is not a directory",
            path.display()
        )));
    }
    fs2::available_space(path).map_err(|e| {
        CrawlerError::FatalConfig(format!("cannot read free space of {}: {}", path.display(), e))
    })
}

/// Free space on the download volume.
pub trait FreeSpace: Send + Sync {
    fn available(&self) -> Result<u64>;
}

/// Reads the real filesystem.
#[derive(Debug, Clone)]
pub struct VolumeFreeSpace {
    path: PathBuf,
}

impl VolumeFreeSpace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FreeSpace for VolumeFreeSpace {
    fn available(&self) -> Result<u64> {
        available_space(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_images_to_download() {
        assert_eq!(images_to_download(712 * MIB, 356 * MIB), 2);
        assert_eq!(images_to_download(711 * MIB, 356 * MIB), 1);
        assert_eq!(images_to_download(355 * MIB, 356 * MIB), 0);
        assert_eq!(images_to_download(0, 356 * MIB), 0);
        assert_eq!(images_to_download(712 * MIB, 0), 0);
    }

    #[test]
    fn test_missing_volume_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        assert!(matches!(available_space(&missing), Err(CrawlerError::FatalConfig(_))));

        let file = tmp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            VolumeFreeSpace::new(&file).available(),
            Err(CrawlerError::FatalConfig(_))
        ));
    }

    #[test]
    fn test_existing_volume_reports_space() {
        let tmp = TempDir::new().unwrap();
        assert!(VolumeFreeSpace::new(tmp.path()).available().is_ok());
    }
}
