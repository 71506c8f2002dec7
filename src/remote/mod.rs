//! Remote share access
//!
//! The provider talks to shares only through [`RemoteStore`]. The wire
//! protocol and authentication live behind that trait.

pub mod errors;
#[cfg(test)]
pub mod scripted;
pub mod share;
pub mod types;

use async_trait::async_trait;

use crate::accounts::Account;

pub use errors::RemoteError;
pub use share::MountedShare;
pub use types::*;

/// Capabilities the provider needs from a remote share
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the children of the directory at `path` (always ends with `/`)
    async fn list_children(
        &self,
        account: &Account,
        path: &str,
    ) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Stat and open the file at `path` for reading
    async fn open(&self, account: &Account, path: &str) -> Result<RemoteFile, RemoteError>;

    /// Whether `path` can currently be reached
    async fn is_reachable(&self, account: &Account, path: &str) -> bool;
}
