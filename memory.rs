//! In-memory backend with flat-key, object-store semantics.
//!
//! Keys are full paths; "directories" exist only as key prefixes. Used as the
//! backend for unit tests. The fault-injection hooks
//! ([`InMemoryStorage::fail_path`], [`InMemoryStorage::cancel_on`]) are test
//! tooling, not part of normal operation.

use crate::error::{StorageError, StorageResult};
use crate::metadata::FileInfo;
use crate::storage::{dir_prefix, join, ByteStream, Storage};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{self, Cursor};
use std::time::SystemTime;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    files: RwLock<BTreeMap<String, Entry>>,
    failing: RwLock<HashSet<String>>,
    cancelling: RwLock<HashSet<String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Raw stored bytes of a key, bypassing any transform.
    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).map(|e| e.data.clone())
    }

    /// Stores raw bytes under a key, bypassing any transform.
    pub fn insert_raw(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.write().insert(
            path.into(),
            Entry {
                data: data.into(),
                modified: SystemTime::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    fn check(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if self.cancelling.write().remove(path) {
            cancel.cancel();
            return Err(StorageError::Cancelled);
        }
        if self.failing.read().contains(path) {
            return Err(StorageError::Transport {
                path: path.to_string(),
                source: io::Error::other("injected failure"),
            });
        }
        Ok(())
    }

    /// Keys equal to `path` or nested under it.
    fn subtree(&self, path: &str) -> Vec<String> {
        let nested = dir_prefix(path);
        self.files
            .read()
            .keys()
            .filter(|k| k.as_str() == path || (!nested.is_empty() && k.starts_with(&nested)))
            .cloned()
            .collect()
    }

    fn remove_keys(&self, cancel: &CancellationToken, keys: Vec<String>) -> StorageResult<()> {
        for key in &keys {
            self.check(cancel, key)?;
        }
        let mut files = self.files.write();
        for key in keys {
            files.remove(&key);
        }
        Ok(())
    }
}

/// Fault injection.
///
/// These hooks exist so tests can make chosen keys fail or cancel and observe
/// how wrappers handle partial failure. Production code has no reason to
/// call them; with no faults registered every operation behaves normally.
impl InMemoryStorage {
    /// Makes every operation touching exactly `path` fail with a transport
    /// error. For fault-injection tests only.
    pub fn fail_path(&self, path: impl Into<String>) {
        self.failing.write().insert(path.into());
    }

    /// Makes the first operation touching exactly `path` cancel the caller's
    /// token. For fault-injection tests only.
    pub fn cancel_on(&self, path: impl Into<String>) {
        self.cancelling.write().insert(path.into());
    }

    /// Removes every injected fault.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
        self.cancelling.write().clear();
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        mut reader: ByteStream,
    ) -> StorageResult<()> {
        self.check(cancel, path)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        debug!(path, size = data.len(), "memory put");
        self.insert_raw(path, data);
        Ok(())
    }

    async fn get(&self, cancel: &CancellationToken, path: &str) -> StorageResult<ByteStream> {
        self.check(cancel, path)?;
        let data = self
            .raw(path)
            .ok_or_else(|| StorageError::not_found(path))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<Vec<String>> {
        let infos = self.list_info(cancel, prefix).await?;
        Ok(infos.into_iter().map(|i| i.path).collect())
    }

    async fn list_info(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<Vec<FileInfo>> {
        self.check(cancel, prefix)?;
        let prefix = dir_prefix(prefix);
        Ok(self
            .files
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, e)| FileInfo::new(k.clone(), e.modified, e.data.len() as u64))
            .collect())
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        self.check(cancel, path)?;
        match self.files.write().remove(path) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn delete_dir(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        self.check(cancel, path)?;
        let keys = self.subtree(path);
        self.remove_keys(cancel, keys)
    }

    async fn delete_all(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<()> {
        self.check(cancel, prefix)?;
        let nested = dir_prefix(prefix);
        let keys: Vec<String> = self
            .files
            .read()
            .keys()
            .filter(|k| k.starts_with(&nested) && k.as_str() != prefix)
            .cloned()
            .collect();
        self.remove_keys(cancel, keys)
    }

    async fn delete_all_bulk(
        &self,
        cancel: &CancellationToken,
        paths: &[String],
    ) -> StorageResult<()> {
        for path in paths {
            self.check(cancel, path)?;
            let keys = self.subtree(path);
            self.remove_keys(cancel, keys)?;
        }
        Ok(())
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> StorageResult<bool> {
        self.check(cancel, path)?;
        Ok(self.files.read().contains_key(path))
    }

    async fn list_top_level_dirs(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<BTreeSet<String>> {
        self.check(cancel, prefix)?;
        let prefix = dir_prefix(prefix);
        let mut dirs = BTreeSet::new();
        for key in self.files.read().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some((dir, _)) = rest.split_once('/') {
                if !dir.is_empty() {
                    dirs.insert(join(&prefix, dir));
                }
            }
        }
        Ok(dirs)
    }

    async fn rename(
        &self,
        cancel: &CancellationToken,
        old_path: &str,
        new_path: &str,
    ) -> StorageResult<()> {
        if old_path == new_path {
            return Ok(());
        }
        self.check(cancel, old_path)?;
        self.check(cancel, new_path)?;

        let mut files = self.files.write();
        let entry = files
            .remove(old_path)
            .ok_or_else(|| StorageError::not_found(old_path))?;
        files.insert(new_path.to_string(), entry);
        Ok(())
    }
}
