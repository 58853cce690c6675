//! Local filesystem backend.
//!
//! Object paths map to files below a base directory. Directories are created
//! on demand and are real filesystem entries, so prefix operations work on
//! whole subtrees.

use crate::error::{StorageError, StorageResult};
use crate::metadata::FileInfo;
use crate::storage::{ByteStream, Storage};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name prefix of in-flight writes; such files never show up in listings.
const TMP_PREFIX: &str = ".storecrypt-tmp-";

#[derive(Debug, Clone)]
pub struct LocalStorageOpts {
    pub base_dir: PathBuf,
    pub fsync_on_write: bool,
}

impl LocalStorageOpts {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            fsync_on_write: false,
        }
    }

    pub fn with_fsync(mut self, fsync_on_write: bool) -> Self {
        self.fsync_on_write = fsync_on_write;
        self
    }
}

#[derive(Debug)]
pub struct LocalStorage {
    base_dir: PathBuf,
    fsync_on_write: bool,
}

impl LocalStorage {
    /// Opens the backend, creating the base directory if needed.
    pub async fn open(opts: LocalStorageOpts) -> StorageResult<Self> {
        fs::create_dir_all(&opts.base_dir)
            .await
            .map_err(|e| StorageError::from_io(opts.base_dir.display().to_string(), e))?;
        info!(base_dir = %opts.base_dir.display(), fsync = opts.fsync_on_write, "opened local storage");
        Ok(Self {
            base_dir: opts.base_dir,
            fsync_on_write: opts.fsync_on_write,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves a relative object path below the base directory.
    fn full_path(&self, path: &str) -> StorageResult<PathBuf> {
        let mut full = self.base_dir.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(StorageError::invalid_path(path, "parent directory reference"))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::invalid_path(path, "path must be relative"))
                }
            }
        }
        Ok(full)
    }

    /// Slash-separated path of `full` relative to the base directory.
    fn relative(&self, full: &Path) -> String {
        let rel = full.strip_prefix(&self.base_dir).unwrap_or(full);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Removes a file or a whole directory tree. Missing targets are fine.
    async fn remove_any(&self, path: &str, full: &Path) -> StorageResult<()> {
        let meta = match fs::symlink_metadata(full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::from_io(path, e)),
        };
        let res = if meta.is_dir() {
            fs::remove_dir_all(full).await
        } else {
            fs::remove_file(full).await
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }
}

fn check(cancel: &CancellationToken) -> StorageResult<()> {
    if cancel.is_cancelled() {
        return Err(StorageError::Cancelled);
    }
    Ok(())
}

fn is_temp(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(TMP_PREFIX))
}

fn modified(meta: &std::fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        mut reader: ByteStream,
    ) -> StorageResult<()> {
        check(cancel)?;
        let full = self.full_path(path)?;
        if full == self.base_dir {
            return Err(StorageError::invalid_path(path, "path names no object"));
        }
        let parent = full.parent().unwrap_or(&self.base_dir).to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;

        // Stage into a temp file next to the target so the final rename is
        // atomic. Dropping `tmp_path` removes the temp file.
        let tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(&parent)
            .map_err(|e| StorageError::from_io(path, e))?;
        let (std_file, tmp_path) = tmp.into_parts();
        let mut file = fs::File::from_std(std_file);

        let copied = tokio::select! {
            res = tokio::io::copy(&mut reader, &mut file) => Some(res),
            _ = cancel.cancelled() => None,
        };
        let Some(copied) = copied else {
            drop(file);
            if let Err(e) = tmp_path.close() {
                warn!(path, error = %e, "failed to remove temp file after cancel");
            }
            return Err(StorageError::Cancelled);
        };
        let bytes = copied.map_err(|e| StorageError::from_io(path, e))?;

        file.flush()
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        if self.fsync_on_write {
            file.sync_all()
                .await
                .map_err(|e| StorageError::from_io(path, e))?;
        }
        drop(file);

        tmp_path
            .persist(&full)
            .map_err(|e| StorageError::from_io(path, e.error))?;
        debug!(path, bytes, "local put");
        Ok(())
    }

    async fn get(&self, cancel: &CancellationToken, path: &str) -> StorageResult<ByteStream> {
        check(cancel)?;
        let full = self.full_path(path)?;
        let file = fs::File::open(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        Ok(Box::new(file))
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
        check(cancel)?;
        let root = self.full_path(prefix)?;
        let meta = match fs::metadata(&root).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_io(prefix, e)),
        };
        if meta.is_file() {
            return Ok(vec![FileInfo::new(
                self.relative(&root),
                modified(&meta),
                meta.len(),
            )]);
        }

        let mut result = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            check(cancel)?;
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::from_io(self.relative(&dir), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(self.relative(&dir), e))?
            {
                let entry_path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::from_io(self.relative(&entry_path), e))?;
                if meta.is_dir() {
                    pending.push(entry_path);
                } else if meta.is_file() && !is_temp(&entry_path) {
                    result.push(FileInfo::new(
                        self.relative(&entry_path),
                        modified(&meta),
                        meta.len(),
                    ));
                }
            }
        }

        result.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(result)
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        check(cancel)?;
        let full = self.full_path(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        debug!(path, "local delete");
        Ok(())
    }

    async fn delete_dir(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        check(cancel)?;
        let full = self.full_path(path)?;
        self.remove_any(path, &full).await
    }

    async fn delete_all(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<()> {
        check(cancel)?;
        let full = self.full_path(prefix)?;
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::from_io(prefix, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(prefix, e))?
        {
            check(cancel)?;
            let entry_path = entry.path();
            self.remove_any(&self.relative(&entry_path), &entry_path)
                .await?;
        }
        Ok(())
    }

    async fn delete_all_bulk(
        &self,
        cancel: &CancellationToken,
        paths: &[String],
    ) -> StorageResult<()> {
        for path in paths {
            check(cancel)?;
            let full = self.full_path(path)?;
            self.remove_any(path, &full).await?;
        }
        Ok(())
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> StorageResult<bool> {
        check(cancel)?;
        let full = self.full_path(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn list_top_level_dirs(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<BTreeSet<String>> {
        check(cancel)?;
        let full = self.full_path(prefix)?;
        let mut dirs = BTreeSet::new();
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(StorageError::from_io(prefix, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(prefix, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::from_io(prefix, e))?;
            if file_type.is_dir() {
                dirs.insert(self.relative(&entry.path()));
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
        check(cancel)?;
        let old_full = self.full_path(old_path)?;
        let new_full = self.full_path(new_path)?;
        if old_full == new_full {
            return Ok(());
        }

        if let Some(parent) = new_full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(new_path, e))?;
        }
        fs::rename(&old_full, &new_full)
            .await
            .map_err(|e| StorageError::from_io(old_path, e))?;
        debug!(from = old_path, to = new_path, "local rename");
        Ok(())
    }
}
