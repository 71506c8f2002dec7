//! Mounted share backend
//!
//! Serves a share that the operating system has already mounted (CIFS, NFS,
//! sshfs, ...). The account's `server` field is the mount point.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, trace, warn};

use super::types::{system_time_to_millis, RemoteEntry, RemoteFile};
use super::{RemoteError, RemoteStore};
use crate::accounts::Account;

/// Remote store reading from locally mounted share directories
#[derive(Debug, Default, Clone)]
pub struct MountedShare;

impl MountedShare {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a remote path below the account's mount point.
    ///
    /// Rejects `..` so an id can never escape the share.
    fn resolve(account: &Account, path: &str) -> Result<PathBuf, RemoteError> {
        let mut resolved = PathBuf::from(&account.server);
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(RemoteError::NotFound(path.to_string())),
            }
        }
        Ok(resolved)
    }

    fn entry_from_metadata(name: String, metadata: &std::fs::Metadata) -> RemoteEntry {
        let last_modified = metadata
            .modified()
            .map(system_time_to_millis)
            .unwrap_or(0);
        RemoteEntry {
            name,
            is_directory: metadata.is_dir(),
            last_modified,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
        }
    }
}

#[async_trait]
impl RemoteStore for MountedShare {
    async fn list_children(
        &self,
        account: &Account,
        path: &str,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let dir = Self::resolve(account, path)?;
        debug!(account = %account.name, path = path, dir = %dir.display(), "Listing share directory");

        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| RemoteError::from_io(path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata().await {
                Ok(metadata) => entries.push(Self::entry_from_metadata(name, &metadata)),
                Err(e) => {
                    // Entry vanished or is unreadable; skip it rather than fail the listing
                    warn!(path = path, name = %name, error = %e, "Skipping unreadable entry");
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        trace!(path = path, count = entries.len(), "Listed share directory");
        Ok(entries)
    }

    async fn open(&self, account: &Account, path: &str) -> Result<RemoteFile, RemoteError> {
        let file_path = Self::resolve(account, path)?;
        let file = fs::File::open(&file_path)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;

        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(RemoteFile {
            entry: Self::entry_from_metadata(name, &metadata),
            reader: Box::pin(file),
        })
    }

    async fn is_reachable(&self, account: &Account, path: &str) -> bool {
        match Self::resolve(account, path) {
            Ok(p) => fs::metadata(&p).await.is_ok(),
            Err(_) => false,
        }
    }
}
