//! Remote Store Error Types
//!
//! Structured error handling for operations against a remote share.
//! Maps I/O error kinds to specific variants so callers can tell a missing
//! entry from an unreachable server.

use std::io;

/// Remote share error types
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Not found on remote: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Share unreachable: {0}")]
    Unreachable(String),

    #[error("Remote I/O error: {0}")]
    Io(String),
}

impl RemoteError {
    /// Whether a later attempt could plausibly succeed.
    ///
    /// Informational only: nothing in the provider retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_) | RemoteError::Io(_))
    }

    /// Classify an I/O error raised while talking to the share at `path`
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => RemoteError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => {
                RemoteError::Forbidden(format!("{}: {}", path, err))
            }
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut => RemoteError::Unreachable(format!("{}: {}", path, err)),
            _ => RemoteError::Io(format!("{}: {}", path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classification() {
        let err = RemoteError::from_io("/a", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, RemoteError::NotFound(ref p) if p == "/a"));
        assert!(!err.is_retryable());

        let err = RemoteError::from_io("/a", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, RemoteError::Forbidden(_)));

        let err = RemoteError::from_io("/a", io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, RemoteError::Unreachable(_)));
        assert!(err.is_retryable());

        let err = RemoteError::from_io("/a", io::Error::other("boom"));
        assert!(matches!(err, RemoteError::Io(_)));
    }
}
