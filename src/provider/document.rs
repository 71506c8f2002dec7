//! Documents and directory snapshots
//!
//! Both are immutable value types: a re-observed entry produces a new
//! `Document`, and a re-listed directory produces a new `ChildQueryResult`.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::document_id::{child_id, DocumentId};
use crate::remote::RemoteEntry;

/// MIME type the host uses for directories
pub const MIME_TYPE_DIR: &str = "vnd.android.document/directory";

/// Fallback MIME type for files with an unknown extension
pub const MIME_TYPE_UNKNOWN: &str = "application/octet-stream";

/// Metadata of one file or directory at the moment it was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    pub document_id: String,
    pub flags: i64,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
    pub mime_type: String,
    pub size: u64,
}

impl Document {
    /// Document for a child entry listed inside `parent_id`
    pub fn from_entry(parent_id: &str, entry: &RemoteEntry) -> Self {
        Self::with_id(
            child_id(parent_id, &entry.name, entry.is_directory),
            entry,
        )
    }

    /// Document for an entry whose id is already known (e.g. a stat before download)
    pub fn with_id(document_id: String, entry: &RemoteEntry) -> Self {
        let mime_type = if entry.is_directory {
            MIME_TYPE_DIR.to_string()
        } else {
            mime_type_for_name(&entry.name)
        };

        Self {
            name: entry.name.clone(),
            document_id,
            flags: 0,
            last_modified: entry.last_modified,
            mime_type,
            size: if entry.is_directory { 0 } else { entry.size },
        }
    }

    /// Placeholder for a directory nothing is known about yet
    pub fn synthesized_directory(id: &DocumentId<'_>) -> Self {
        Self {
            name: id.leaf_name().to_string(),
            document_id: id.as_str().to_string(),
            flags: 0,
            last_modified: 0,
            mime_type: MIME_TYPE_DIR.to_string(),
            size: 0,
        }
    }
}

/// The result of listing one directory: parent, children and fetch time.
///
/// Held behind an `Arc` and replaced wholesale, so a reader always sees a
/// parent and children from the same fetch.
#[derive(Debug, Clone)]
pub struct ChildQueryResult {
    pub parent: Document,
    pub children: Vec<Document>,
    pub fetched_at: Instant,
}

impl ChildQueryResult {
    pub fn new(parent: Document, children: Vec<Document>) -> Self {
        Self {
            parent,
            children,
            fetched_at: Instant::now(),
        }
    }

    pub fn parent_id(&self) -> &str {
        &self.parent.document_id
    }

    /// Find `document_id` as either the parent or one of the children
    pub fn find(&self, document_id: &str) -> Option<&Document> {
        if self.parent.document_id == document_id {
            return Some(&self.parent);
        }
        self.children
            .iter()
            .find(|child| child.document_id == document_id)
    }
}

/// Infer a MIME type from a file name's extension
pub fn mime_type_for_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => mime_guess::from_ext(&ext.to_ascii_lowercase())
            .first_or_octet_stream()
            .to_string(),
        _ => MIME_TYPE_UNKNOWN.to_string(),
    }
}
