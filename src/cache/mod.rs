//! Caching layer
//!
//! The directory cache keeps the last listing in memory; the content cache
//! keeps downloaded files on disk.

pub mod content;
pub mod directory;

pub use content::ContentCache;
pub use directory::{ChildLookup, DirectoryCache};
