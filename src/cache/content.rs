//! Local content cache
//!
//! Keeps downloaded copies of remote files on local disk, one file per
//! document id. A cached file's modification time mirrors the remote
//! `last_modified` so staleness can be decided without touching the network.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use filetime::FileTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{ProviderError, ProviderResult};
use crate::remote::{system_time_to_millis, RemoteReader};

/// Prefix of in-progress download files
const TEMP_PREFIX: &str = ".download-";

/// Local disk cache for downloaded document content
pub struct ContentCache {
    /// Root directory for cached files
    cache_dir: PathBuf,
    /// Largest mtime difference still treated as "same version"
    tolerance_ms: i64,
    /// Bytes transferred between cancellation checks
    chunk_size: usize,
}

impl ContentCache {
    /// Create a content cache rooted at `cache_dir`
    ///
    /// # Arguments
    /// * `cache_dir` - Directory to store cached files
    /// * `tolerance_ms` - Allowed mtime drift between local copy and remote
    /// * `chunk_size` - Download buffer size in bytes
    pub fn new(cache_dir: PathBuf, tolerance_ms: i64, chunk_size: usize) -> Result<Self> {
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", cache_dir))?;

        let cache = Self {
            cache_dir,
            tolerance_ms,
            chunk_size: chunk_size.max(1),
        };

        // Interrupted downloads from previous runs
        cache.cleanup();

        info!(cache_dir = %cache.cache_dir.display(), "Content cache initialized");
        Ok(cache)
    }

    /// Deterministic local path for `document_id`.
    ///
    /// Each id component is percent-encoded into one path component below
    /// the cache root, so distinct ids never share a file. A leading `.` is
    /// encoded as well: `.` and `..` cannot climb out of the cache and no
    /// cached file can look like a temp file.
    pub fn path_for(&self, document_id: &str) -> PathBuf {
        let mut path = self.cache_dir.clone();
        for component in document_id.split('/') {
            path.push(encode_component(component));
        }
        path
    }

    /// Modification time of the cached copy in ms, or `None` if there is none
    pub fn cached_mtime(&self, local_path: &Path) -> Option<i64> {
        let metadata = fs::metadata(local_path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(metadata.modified().map(system_time_to_millis).unwrap_or(0))
    }

    /// Whether a local copy with `local_mtime` is out of date against `remote_mtime`
    pub fn is_stale(&self, local_mtime: i64, remote_mtime: i64) -> bool {
        (remote_mtime - local_mtime).abs() > self.tolerance_ms
    }

    /// Delete the cached copy at `local_path`, returning whether one existed
    pub fn invalidate(&self, local_path: &Path) -> io::Result<bool> {
        match fs::remove_file(local_path) {
            Ok(()) => {
                debug!(path = %local_path.display(), "Invalidated cached file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stream `reader` into the cache file at `local_path`.
    ///
    /// Bytes go to a temp file next to the target, so the target path never
    /// holds a partial download. `cancel` is checked after every chunk. On
    /// success the file's mtime is set to `last_modified` and it is moved
    /// into place.
    pub async fn download(
        &self,
        local_path: &Path,
        mut reader: RemoteReader,
        last_modified: i64,
        cancel: &CancellationToken,
    ) -> ProviderResult<u64> {
        let parent = local_path.parent().unwrap_or(&self.cache_dir);
        tokio::fs::create_dir_all(parent).await?;

        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(parent)?;
        let mut output = tokio::fs::File::from_std(tmp.as_file().try_clone()?);

        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;
        loop {
            let read = reader
                .read(&mut buf)
                .await
                .map_err(|e| ProviderError::DownloadFailed(e.to_string()))?;
            if read == 0 {
                break;
            }
            output.write_all(&buf[..read]).await?;
            total += read as u64;

            if cancel.is_cancelled() {
                debug!(path = %local_path.display(), bytes = total, "Download cancelled, discarding partial file");
                return Err(ProviderError::Cancelled);
            }
        }
        output.flush().await?;
        drop(output);

        if let Err(e) = filetime::set_file_mtime(tmp.path(), millis_to_file_time(last_modified)) {
            warn!(path = %local_path.display(), error = %e, "Unable to synchronize modification time of downloaded file");
        }

        tmp.persist(local_path).map_err(|e| ProviderError::LocalIo(e.error))?;

        debug!(path = %local_path.display(), size = total, "Stored file in cache");
        Ok(total)
    }

    /// Remove temp files left by interrupted downloads
    pub fn cleanup(&self) {
        let mut pending = vec![self.cache_dir.clone()];
        while let Some(dir) = pending.pop() {
            let read_dir = match fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(_) => continue,
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    pending.push(path);
                } else if entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
                {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Reversible file name for one id component.
///
/// `urlencoding` leaves `.` alone and never emits a bare `%`, so `%2E` for a
/// leading dot and `%` for an empty component cannot collide with the
/// encoding of any other component.
fn encode_component(component: &str) -> String {
    if component.is_empty() {
        return "%".to_string();
    }
    let encoded = urlencoding::encode(component);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

fn millis_to_file_time(millis: i64) -> FileTime {
    FileTime::from_unix_time(
        millis.div_euclid(1000),
        (millis.rem_euclid(1000) * 1_000_000) as u32,
    )
}
