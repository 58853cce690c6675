//! The backend contract shared by every storage medium and wrapper.
//!
//! Paths are relative, forward-slash separated strings. Every operation takes
//! a [`CancellationToken`]; implementations check it at their I/O boundaries
//! and fail with [`StorageError::Cancelled`](crate::error::StorageError::Cancelled).

use crate::error::StorageResult;
use crate::metadata::FileInfo;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Byte stream handed to and returned from storage operations.
/// Dropping it releases the underlying resource.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Minimal capability set every storage medium exposes.
///
/// Implementations hold no shared state with each other; each manages its
/// own connection or session lifecycle. Wrappers implement this trait too,
/// so they can be stacked over any backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores the stream at `path`, replacing any existing object.
    async fn put(&self, cancel: &CancellationToken, path: &str, reader: ByteStream)
        -> StorageResult<()>;

    /// Opens `path` for reading. Fails with `NotFound` if absent.
    async fn get(&self, cancel: &CancellationToken, path: &str) -> StorageResult<ByteStream>;

    /// Returns every object path under `prefix`.
    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<Vec<String>>;

    /// Like [`list`](Self::list) with modification time and size.
    async fn list_info(&self, cancel: &CancellationToken, prefix: &str)
        -> StorageResult<Vec<FileInfo>>;

    /// Removes a single object. Fails with `NotFound` if absent.
    async fn delete(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()>;

    /// Removes `path` and everything under it.
    async fn delete_dir(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()>;

    /// Removes everything under `prefix`, leaving `prefix` itself untouched.
    async fn delete_all(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<()>;

    /// Removes each of `paths` and anything under them. Missing entries are skipped.
    async fn delete_all_bulk(&self, cancel: &CancellationToken, paths: &[String])
        -> StorageResult<()>;

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> StorageResult<bool>;

    /// Directories directly under `prefix`, as paths relative to the storage root.
    async fn list_top_level_dirs(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<BTreeSet<String>>;

    /// Moves `old_path` to `new_path`, creating parent structure as needed.
    /// A no-op when both are equal.
    async fn rename(&self, cancel: &CancellationToken, old_path: &str, new_path: &str)
        -> StorageResult<()>;
}

/// Converts host separators to forward slashes.
pub fn to_slash(path: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Normalizes a listing prefix to directory form: `""` or `"dir/"`.
pub fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Joins a directory prefix and a child name with a single slash.
pub fn join(prefix: &str, name: &str) -> String {
    format!("{}{}", dir_prefix(prefix), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_prefix() {
        assert_eq!(dir_prefix(""), "");
        assert_eq!(dir_prefix("/"), "");
        assert_eq!(dir_prefix("wal"), "wal/");
        assert_eq!(dir_prefix("wal//"), "wal/");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("base", "a"), "base/a");
        assert_eq!(join("base/", "a"), "base/a");
    }

    #[test]
    fn test_to_slash_keeps_forward_slashes() {
        assert_eq!(to_slash("wal/0001.gz"), "wal/0001.gz");
    }
}
