//! Daemon configuration
//!
//! Defaults come from the platform directories; each field can be
//! overridden through a `SHAREPROVIDER_*` environment variable.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Default Unix socket for the IPC server
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/shareprovider.sock";

/// Repeat queries within this window are answered without a refetch
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(2);

/// Allowed mtime drift between a cached copy and the remote file, in ms
pub const DEFAULT_MTIME_TOLERANCE_MS: i64 = 999;

/// Download buffer size
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Concurrent background refreshes and downloads
pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local content cache
    pub cache_dir: PathBuf,
    /// SQLite file of the persistent metadata store
    pub database_path: PathBuf,
    /// JSON file listing configured accounts
    pub accounts_path: PathBuf,
    pub socket_path: PathBuf,
    pub freshness_window: Duration,
    pub mtime_tolerance_ms: i64,
    pub chunk_size: usize,
    pub max_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let cache_base = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("shareprovider");
        let data_base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("shareprovider");
        let config_base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("shareprovider");

        Self {
            cache_dir: cache_base.join("documents"),
            database_path: data_base.join("documents.db"),
            accounts_path: config_base.join("accounts.json"),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            mtime_tolerance_ms: DEFAULT_MTIME_TOLERANCE_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("SHAREPROVIDER_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("SHAREPROVIDER_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SHAREPROVIDER_ACCOUNTS") {
            self.accounts_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SHAREPROVIDER_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SHAREPROVIDER_FRESHNESS_MS") {
            self.freshness_window = Duration::from_millis(ms);
        }
        if let Some(workers) = parse_var::<usize>(&lookup, "SHAREPROVIDER_MAX_WORKERS") {
            self.max_workers = workers.max(1);
        }
        self
    }

    /// Configuration rooted in a single directory, used by tests
    #[cfg(test)]
    pub fn in_dir(dir: &std::path::Path) -> Self {
        Self {
            cache_dir: dir.join("cache"),
            database_path: dir.join("documents.db"),
            accounts_path: dir.join("accounts.json"),
            socket_path: dir.join("shareprovider.sock"),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            mtime_tolerance_ms: DEFAULT_MTIME_TOLERANCE_MS,
            chunk_size: 4,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring malformed configuration value");
            None
        }
    }
}
