//! Remote share types
//!
//! Entries as observed on the remote side, before they are turned into
//! provider documents.

use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncRead;

/// One entry of a remote directory listing, or the stat of a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name (no separators, no trailing slash)
    pub name: String,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Modification time in milliseconds since the Unix epoch
    pub last_modified: i64,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

/// Byte stream of a remote file's content
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// An opened remote file: metadata captured at open time plus its content
pub struct RemoteFile {
    pub entry: RemoteEntry,
    pub reader: RemoteReader,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// Convert a `SystemTime` to milliseconds since the Unix epoch
pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
