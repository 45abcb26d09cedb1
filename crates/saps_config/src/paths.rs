use std::path::PathBuf;
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the SAPS home directory.
///
/// Priority:
/// 1) SAPS_HOME
/// 2) the user's home directory
/// 3) ./.saps
pub fn saps_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SAPS_HOME") {
        return PathBuf::from(override_path);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".saps");
    }
    PathBuf::from(".").join(".saps")
}

fn ensure_home_dir(home: &PathBuf) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create SAPS home directory {}: {}. Set SAPS_HOME or pass --config.",
                home.display(),
                err
            );
        });
    }
}

/// Default catalog path: ~/.saps/catalog.sqlite
pub fn default_catalog_path() -> PathBuf {
    let home = saps_home();
    ensure_home_dir(&home);
    home.join("catalog.sqlite")
}

/// Default config file: ~/.saps/config.toml
pub fn default_config_path() -> PathBuf {
    saps_home().join("config.toml")
}

/// Default logs directory: ~/.saps/logs
pub fn default_logs_dir() -> PathBuf {
    let home = saps_home();
    ensure_home_dir(&home);
    home.join("logs")
}

/// Default pending download queue: ~/.saps/pending-image-download.json
pub fn default_pending_queue_path() -> PathBuf {
    let home = saps_home();
    ensure_home_dir(&home);
    home.join(crate::defaults::DEFAULT_PENDING_QUEUE_FILE)
}
