//! Single-slot directory cache
//!
//! Holds the most recently fetched directory listing. The slot is a `watch`
//! channel over `Option<Arc<ChildQueryResult>>`: writers replace the whole
//! snapshot in one step and readers clone the `Arc` out in one step, so a
//! reader never pairs one fetch's parent with another fetch's children.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::provider::{ChildQueryResult, Document};

/// Outcome of looking up a parent's children in the slot
#[derive(Debug, Clone)]
pub enum ChildLookup {
    /// Cached listing younger than the freshness window
    Fresh(Arc<ChildQueryResult>),
    /// Cached listing for this parent, but old enough to refresh
    Stale(Arc<ChildQueryResult>),
    /// Slot is empty or holds another directory
    Miss,
}

/// Cache of the last listed directory
pub struct DirectoryCache {
    slot: watch::Sender<Option<Arc<ChildQueryResult>>>,
    /// How long a listing is served without triggering a refetch
    freshness_window: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DirectoryCache {
    pub fn new(freshness_window: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot,
            freshness_window,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Current snapshot, if any
    pub fn snapshot(&self) -> Option<Arc<ChildQueryResult>> {
        self.slot.borrow().clone()
    }

    /// Replace the slot with `result`, whatever directory it held before
    pub fn replace(&self, result: ChildQueryResult) {
        debug!(
            parent = %result.parent.document_id,
            children = result.children.len(),
            "Cached directory listing"
        );
        self.slot.send_replace(Some(Arc::new(result)));
    }

    /// Look up the children of `parent_id`, classifying the hit by age
    pub fn children_of(&self, parent_id: &str) -> ChildLookup {
        self.children_of_at(parent_id, Instant::now())
    }

    fn children_of_at(&self, parent_id: &str, now: Instant) -> ChildLookup {
        match self.snapshot() {
            Some(last) if last.parent_id() == parent_id => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let age = now.saturating_duration_since(last.fetched_at);
                if age < self.freshness_window {
                    trace!(parent = parent_id, age_ms = age.as_millis() as u64, "Directory cache HIT (fresh)");
                    ChildLookup::Fresh(last)
                } else {
                    trace!(parent = parent_id, age_ms = age.as_millis() as u64, "Directory cache HIT (stale)");
                    ChildLookup::Stale(last)
                }
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(parent = parent_id, "Directory cache MISS");
                ChildLookup::Miss
            }
        }
    }

    /// Find `document_id` as the cached parent or one of its children
    pub fn find(&self, document_id: &str) -> Option<Document> {
        let last = self.snapshot()?;
        let found = last.find(document_id).cloned();
        if found.is_none() && document_id.starts_with(last.parent_id()) {
            trace!(
                document_id = document_id,
                parent = %last.parent.document_id,
                "Document below cached directory but not in its listing"
            );
        }
        found
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        let parent = self
            .snapshot()
            .map(|last| last.parent.document_id.clone());

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            parent = ?parent,
            "Directory cache metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::document::MIME_TYPE_DIR;
    use std::thread;

    fn dir_doc(id: &str) -> Document {
        Document {
            name: id.to_string(),
            document_id: id.to_string(),
            flags: 0,
            last_modified: 0,
            mime_type: MIME_TYPE_DIR.to_string(),
            size: 0,
        }
    }

    fn file_doc(parent: &str, name: &str) -> Document {
        Document {
            name: name.to_string(),
            document_id: format!("{}{}", parent, name),
            flags: 0,
            last_modified: 1_000,
            mime_type: "text/plain".to_string(),
            size: 1,
        }
    }

    fn listing(parent: &str, names: &[&str]) -> ChildQueryResult {
        ChildQueryResult::new(
            dir_doc(parent),
            names.iter().map(|n| file_doc(parent, n)).collect(),
        )
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = DirectoryCache::new(Duration::from_secs(2));
        assert!(matches!(cache.children_of("acct/"), ChildLookup::Miss));

        cache.replace(listing("acct/", &["a.txt"]));
        assert!(matches!(cache.children_of("acct/"), ChildLookup::Fresh(_)));
        assert!(matches!(cache.children_of("acct/docs/"), ChildLookup::Miss));

        let (hits, misses, hit_rate) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 2);
        assert!(hit_rate > 33.0 && hit_rate < 34.0);
    }

    #[test]
    fn test_freshness_window() {
        let cache = DirectoryCache::new(Duration::from_secs(2));
        let result = listing("acct/", &["a.txt"]);
        let fetched_at = result.fetched_at;
        cache.replace(result);

        let at = |secs| fetched_at + Duration::from_secs(secs);
        assert!(matches!(cache.children_of_at("acct/", at(1)), ChildLookup::Fresh(_)));
        assert!(matches!(cache.children_of_at("acct/", at(2)), ChildLookup::Stale(_)));
        assert!(matches!(cache.children_of_at("acct/", at(3)), ChildLookup::Stale(_)));
    }

    #[test]
    fn test_replace_evicts_other_directory() {
        let cache = DirectoryCache::new(Duration::from_secs(2));
        cache.replace(listing("acct/a/", &["x.txt"]));
        cache.replace(listing("acct/b/", &["y.txt"]));

        assert!(cache.find("acct/a/x.txt").is_none());
        assert_eq!(cache.find("acct/b/y.txt").unwrap().name, "y.txt");
        assert_eq!(cache.find("acct/b/").unwrap().document_id, "acct/b/");
        assert!(matches!(cache.children_of("acct/a/"), ChildLookup::Miss));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let cache = Arc::new(DirectoryCache::new(Duration::from_secs(2)));
        cache.replace(listing("acct/a/", &["1", "2", "3"]));

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..500 {
                    let parent = if i % 2 == 0 { "acct/b/" } else { "acct/a/" };
                    cache.replace(listing(parent, &["1", "2", "3"]));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let last = cache.snapshot().unwrap();
                        for child in &last.children {
                            assert!(child.document_id.starts_with(last.parent_id()));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
