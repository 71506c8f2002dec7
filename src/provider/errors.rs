//! Provider error taxonomy
//!
//! Foreground failures (malformed ids, open) are returned to the caller as
//! these values. Background refresh failures are logged and never surface here.

use std::io;

use crate::remote::RemoteError;

/// Errors returned by the document provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("No metadata known for document: {0}")]
    NotFound(String),

    #[error("Malformed document id: {0:?}")]
    MalformedIdentifier(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(#[from] RemoteError),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Local cache I/O error: {0}")]
    LocalIo(#[from] io::Error),

    #[error("Metadata store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Unsupported open mode {0:?}: documents are read-only")]
    UnsupportedMode(String),

    #[error("Document is a directory: {0}")]
    IsDirectory(String),
}

impl ProviderError {
    /// Stable error code for IPC replies
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotFound(_) => "notFound",
            ProviderError::MalformedIdentifier(_) => "malformedIdentifier",
            ProviderError::UnknownAccount(_) => "unknownAccount",
            ProviderError::RemoteUnavailable(_) => "remoteUnavailable",
            ProviderError::DownloadFailed(_) => "downloadFailed",
            ProviderError::Cancelled => "cancelled",
            ProviderError::LocalIo(_) => "localIoError",
            ProviderError::Store(_) => "storeError",
            ProviderError::UnsupportedMode(_) => "unsupportedMode",
            ProviderError::IsDirectory(_) => "isDirectory",
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
