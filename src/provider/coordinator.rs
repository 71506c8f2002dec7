//! Document provider
//!
//! Answers the host's browsing queries synchronously from the last listed
//! directory and the metadata store, and pushes everything that needs the
//! network onto background workers. A worker that finishes a listing swaps
//! the directory cache and publishes a change notification; the host then
//! queries again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::cursor::{wants_volatile, Cursor, Projection, RootRow};
use super::document::{ChildQueryResult, Document};
use super::document_id::{self, DocumentId};
use super::errors::{ProviderError, ProviderResult};
use crate::accounts::{Account, AccountSource};
use crate::cache::{ChildLookup, ContentCache, DirectoryCache};
use crate::config::Config;
use crate::remote::RemoteStore;
use crate::store::DocumentStore;

/// Authority the provider's change notifications are issued under
pub const AUTHORITY: &str = "shareprovider";

/// Pending notifications kept per subscriber before it starts lagging
const NOTIFICATION_CAPACITY: usize = 256;

/// A document whose listing changed; the host should re-query it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub authority: String,
    pub document_id: String,
}

/// Read-only handle to a cached document
#[derive(Debug)]
pub struct OpenedDocument {
    pub path: PathBuf,
    pub file: tokio::fs::File,
}

struct Inner {
    accounts: Arc<dyn AccountSource>,
    remote: Arc<dyn RemoteStore>,
    store: DocumentStore,
    directories: DirectoryCache,
    content: ContentCache,
    notifications: broadcast::Sender<ChangeNotification>,
    /// Runtime that background workers are spawned on
    runtime: Handle,
    tasks: TaskTracker,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    /// Serializes concurrent opens of the same document
    download_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// The provider instance shared by all callers and workers
#[derive(Clone)]
pub struct DocumentProvider {
    inner: Arc<Inner>,
}

impl DocumentProvider {
    /// Create a provider; must be called from within a tokio runtime
    pub fn new(
        config: &Config,
        accounts: Arc<dyn AccountSource>,
        remote: Arc<dyn RemoteStore>,
        store: DocumentStore,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("Document provider needs a tokio runtime")?;
        let content = ContentCache::new(
            config.cache_dir.clone(),
            config.mtime_tolerance_ms,
            config.chunk_size,
        )?;
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        info!(
            cache_dir = %content.cache_dir().display(),
            known_documents = store.len().unwrap_or(0),
            freshness_ms = config.freshness_window.as_millis() as u64,
            max_workers = config.max_workers,
            "Document provider ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                accounts,
                remote,
                store,
                directories: DirectoryCache::new(config.freshness_window),
                content,
                notifications,
                runtime,
                tasks: TaskTracker::new(),
                workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
                shutdown: CancellationToken::new(),
                download_locks: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// One root per configured account
    pub fn list_roots(&self) -> Vec<RootRow> {
        let roots: Vec<RootRow> = self
            .inner
            .accounts
            .list_accounts()
            .iter()
            .map(RootRow::for_account)
            .collect();
        debug!(count = roots.len(), "Listed roots");
        roots
    }

    /// Metadata of a single document, without touching the network
    pub fn query_document(&self, document_id: &str, projection: &Projection) -> ProviderResult<Cursor> {
        let id = DocumentId::parse(document_id)?;
        if id.is_root() {
            return Ok(Cursor::root_document(projection, &id));
        }

        match self.inner.best_known(document_id, wants_volatile(projection))? {
            Some(doc) => Ok(Cursor::documents(projection, [&doc])),
            None => Err(ProviderError::NotFound(document_id.to_string())),
        }
    }

    /// Children of a directory.
    ///
    /// Returns immediately: a fresh cached listing as is, a stale one flagged
    /// as loading, or an empty loading placeholder. The last two start a
    /// background refresh and subscribe the result to `parent_document_id`.
    pub fn query_child_documents(
        &self,
        parent_document_id: &str,
        projection: &Projection,
    ) -> ProviderResult<Cursor> {
        DocumentId::parse(parent_document_id)?;

        let cursor = match self.inner.directories.children_of(parent_document_id) {
            ChildLookup::Fresh(last) => return Ok(Cursor::documents(projection, &last.children)),
            ChildLookup::Stale(last) => Cursor::documents(projection, &last.children),
            ChildLookup::Miss => Cursor::loading_placeholder(projection),
        };

        self.spawn_refresh(parent_document_id.to_string());
        Ok(cursor.with_notification(parent_document_id, true))
    }

    /// Open a document for reading, downloading it first if needed.
    ///
    /// A cached copy is reused unless the best known remote metadata says it
    /// is stale. `cancel` aborts a download between chunks.
    pub async fn open_document(
        &self,
        document_id: &str,
        mode: &str,
        cancel: CancellationToken,
    ) -> ProviderResult<OpenedDocument> {
        if mode != "r" {
            return Err(ProviderError::UnsupportedMode(mode.to_string()));
        }
        let id = DocumentId::parse(document_id)?;
        if id.is_directory() {
            return Err(ProviderError::IsDirectory(document_id.to_string()));
        }

        let lock = self.inner.download_lock(document_id);
        let _guard = lock.lock().await;

        let local_path = self.inner.content.path_for(document_id);
        let mut cached = false;
        if let Some(local_mtime) = self.inner.content.cached_mtime(&local_path) {
            cached = true;
            if let Some(known) = self.inner.best_known(document_id, true)? {
                if self.inner.content.is_stale(local_mtime, known.last_modified) {
                    info!(
                        document_id = document_id,
                        local_mtime = local_mtime,
                        remote_mtime = known.last_modified,
                        "Cached copy is stale, downloading a fresh one"
                    );
                    self.inner.content.invalidate(&local_path)?;
                    cached = false;
                }
            }
        }

        if cached {
            debug!(document_id = document_id, "Content cache HIT");
        } else {
            self.download(document_id, local_path.clone(), cancel).await?;
        }

        let file = tokio::fs::File::open(&local_path).await?;
        Ok(OpenedDocument {
            path: local_path,
            file,
        })
    }

    /// Whether `document_id` is below `parent_document_id`
    pub fn is_child_document(&self, parent_document_id: &str, document_id: &str) -> bool {
        document_id::is_child_document(parent_document_id, document_id)
    }

    /// Whether the share behind `account_name` is reachable right now
    pub async fn test_connection(&self, account_name: &str) -> ProviderResult<bool> {
        let account = self.inner.account(account_name)?;
        Ok(self.inner.remote.is_reachable(&account, "/").await)
    }

    /// Receive change notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.notifications.subscribe()
    }

    /// Background workers still running
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Directory cache statistics: (hits, misses, hit_rate)
    pub fn directory_stats(&self) -> (u64, u64, f64) {
        self.inner.directories.log_metrics();
        self.inner.directories.stats()
    }

    /// Stop all workers; their results are discarded
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "Shutting down document provider");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn spawn_refresh(&self, parent_id: String) {
        if self.inner.shutdown.is_cancelled() {
            debug!(parent = %parent_id, "Provider shut down, not refreshing");
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .tasks
            .spawn_on(inner.refresh(parent_id), &self.inner.runtime);
    }

    async fn download(
        &self,
        document_id: &str,
        local_path: PathBuf,
        cancel: CancellationToken,
    ) -> ProviderResult<Document> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let inner = Arc::clone(&self.inner);
        let id = document_id.to_string();
        let worker = self
            .inner
            .tasks
            .spawn_on(inner.download(id, local_path, cancel), &self.inner.runtime);

        match worker.await {
            Ok(result) => result,
            Err(e) => Err(ProviderError::DownloadFailed(e.to_string())),
        }
    }
}

impl Inner {
    fn account(&self, name: &str) -> ProviderResult<Account> {
        self.accounts
            .find_account(name)
            .ok_or_else(|| ProviderError::UnknownAccount(name.to_string()))
    }

    /// Best metadata known for `document_id` without going to the network.
    ///
    /// Prefers the last listing. When volatile columns matter and the store
    /// also has a row, whichever was modified later wins: a download records
    /// the remote metadata at fetch time, which can be newer than the listing.
    fn best_known(&self, document_id: &str, volatile: bool) -> ProviderResult<Option<Document>> {
        let listed = self.directories.find(document_id);
        if listed.is_some() && !volatile {
            return Ok(listed);
        }

        let stored = self.store.get(document_id)?;
        Ok(match (listed, stored) {
            (Some(listed), Some(stored)) => {
                if stored.last_modified > listed.last_modified {
                    debug!(document_id = document_id, "Stored metadata is fresher than the listing");
                    Some(stored)
                } else {
                    Some(listed)
                }
            }
            (listed, stored) => listed.or(stored),
        })
    }

    fn download_lock(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .download_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody is holding or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(document_id.to_string()).or_default())
    }

    fn notify(&self, document_id: &str) {
        let notification = ChangeNotification {
            authority: AUTHORITY.to_string(),
            document_id: document_id.to_string(),
        };
        let receivers = self.notifications.send(notification).unwrap_or(0);
        debug!(document_id = document_id, receivers = receivers, "Change notification sent");
    }

    /// List `parent_id` on the remote and swap it into the directory cache
    async fn refresh(self: Arc<Self>, parent_id: String) {
        let _permit = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        debug!(parent = %parent_id, "Refreshing directory listing");
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!(parent = %parent_id, "Refresh abandoned on shutdown");
                return;
            }
            result = self.fetch_directory(&parent_id) => result,
        };

        match result {
            Ok(listing) => {
                if self.shutdown.is_cancelled() {
                    return;
                }
                debug!(parent = %parent_id, children = listing.children.len(), "Directory refreshed");
                self.directories.replace(listing);
                self.notify(&parent_id);
            }
            Err(e) => {
                // The caller already has its answer; the host retries on its own
                let retryable = matches!(&e, ProviderError::RemoteUnavailable(r) if r.is_retryable());
                warn!(parent = %parent_id, error = %e, retryable = retryable, "Failed to refresh directory listing");
            }
        }
    }

    async fn fetch_directory(&self, parent_id: &str) -> ProviderResult<ChildQueryResult> {
        let id = DocumentId::parse(parent_id)?;
        let account = self.account(id.account_name())?;
        let entries = self.remote.list_children(&account, id.path()).await?;

        let parent = match self.best_known(parent_id, false)? {
            Some(known) => known,
            None => Document::synthesized_directory(&id),
        };
        let children = entries
            .iter()
            .map(|entry| Document::from_entry(parent_id, entry))
            .collect();

        Ok(ChildQueryResult::new(parent, children))
    }

    /// Download `document_id` into `local_path` and record its metadata
    async fn download(
        self: Arc<Self>,
        document_id: String,
        local_path: PathBuf,
        cancel: CancellationToken,
    ) -> ProviderResult<Document> {
        let _permit = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ProviderError::Cancelled),
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            permit = Arc::clone(&self.workers).acquire_owned() => permit
                .map_err(|e| ProviderError::DownloadFailed(e.to_string()))?,
        };

        let id = DocumentId::parse(&document_id)?;
        let account = self.account(id.account_name())?;

        // Stat before streaming so last_modified is the remote's, not ours
        let remote = self.remote.open(&account, id.path()).await?;
        let document = Document::with_id(document_id.clone(), &remote.entry);
        info!(document_id = %document_id, size = document.size, "Downloading document");

        let size = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ProviderError::Cancelled),
            result = self.content.download(&local_path, remote.reader, document.last_modified, &cancel) => result?,
        };

        if let Err(e) = self.store.upsert(&document) {
            error!(document_id = %document_id, error = %e, "Failed to record downloaded document metadata");
        }

        info!(document_id = %document_id, size = size, "Downloaded document");
        Ok(document)
    }
}
