//! In-memory remote store for tests
//!
//! Serves scripted listings and file contents and counts every call, so
//! tests can assert how often the provider went to the network.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::{RemoteEntry, RemoteError, RemoteFile, RemoteStore};
use crate::accounts::Account;

#[derive(Default)]
pub struct ScriptedRemote {
    dirs: Mutex<HashMap<String, Vec<RemoteEntry>>>,
    files: Mutex<HashMap<String, (RemoteEntry, Vec<u8>)>>,
    /// Cancelled as soon as the first chunk of any file is read
    cancel_on_read: Mutex<Option<CancellationToken>>,
    pub fail_listing: AtomicBool,
    pub list_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dir(&self, path: &str, entries: Vec<RemoteEntry>) {
        self.dirs.lock().unwrap().insert(path.to_string(), entries);
    }

    pub fn set_file(&self, path: &str, last_modified: i64, content: &[u8]) {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let entry = RemoteEntry {
            name,
            is_directory: false,
            last_modified,
            size: content.len() as u64,
        };
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (entry, content.to_vec()));
    }

    pub fn cancel_on_first_read(&self, token: CancellationToken) {
        *self.cancel_on_read.lock().unwrap() = Some(token);
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

pub fn file_entry(name: &str, last_modified: i64, size: u64) -> RemoteEntry {
    RemoteEntry {
        name: name.to_string(),
        is_directory: false,
        last_modified,
        size,
    }
}

pub fn dir_entry(name: &str) -> RemoteEntry {
    RemoteEntry {
        name: name.to_string(),
        is_directory: true,
        last_modified: 0,
        size: 0,
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn list_children(
        &self,
        _account: &Account,
        path: &str,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable(path.to_string()));
        }
        self.dirs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    async fn open(&self, _account: &Account, path: &str) -> Result<RemoteFile, RemoteError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let (entry, data) = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        let reader = ChunkedReader {
            data,
            pos: 0,
            chunk: 4,
            cancel_on_read: self.cancel_on_read.lock().unwrap().clone(),
        };
        Ok(RemoteFile {
            entry,
            reader: Box::pin(reader),
        })
    }

    async fn is_reachable(&self, _account: &Account, path: &str) -> bool {
        self.dirs.lock().unwrap().contains_key(path)
    }
}

/// Hands out at most `chunk` bytes per read
struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    cancel_on_read: Option<CancellationToken>,
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let end = (this.pos + this.chunk).min(this.data.len());
        let n = (end - this.pos).min(buf.remaining());
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        if n > 0 {
            if let Some(token) = &this.cancel_on_read {
                token.cancel();
            }
        }
        Poll::Ready(Ok(()))
    }
}
