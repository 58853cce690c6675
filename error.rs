use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Custom error types for storecrypt operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested logical or physical object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Incompatible algorithms / write suffix, raised at construction only
    #[error("config error: {0}")]
    Config(String),

    /// Path rejected before reaching the backend
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Backend failure attributed to a specific path (disk, network, protocol)
    #[error("transport error on {path:?}: {source}")]
    Transport {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Stream-level I/O failure not tied to a backend path
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption failures, including authentication failures
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Encrypted stream format errors (version mismatch, truncated chunk)
    #[error("format error: {0}")]
    Format(String),

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Maps an I/O error on `path` to `NotFound` or `Transport`.
    pub fn from_io(path: impl Into<String>, err: io::Error) -> Self {
        let path = path.into();
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Transport { path, source: err }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_not_found() {
        let err = StorageError::from_io("wal/0001", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: wal/0001");

        let err = StorageError::from_io(
            "wal/0001",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!err.is_not_found());
        assert!(matches!(err, StorageError::Transport { ref path, .. } if path == "wal/0001"));
    }
}
