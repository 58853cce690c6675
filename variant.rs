//! Variant-resolving storage.
//!
//! [`VariantStorage`] writes every object with one configured suffix but can
//! read any variant written earlier under a different configuration. Reads
//! check the backend for `base + ext` over a priority table built once from
//! the [`Algorithms`] set, and decode purely from the suffix that was found.
//! That lets a deployment switch e.g. from `.gz` to `.zst.aes` without
//! re-encoding what is already stored.
//!
//! ## Priority Table
//!
//! ```text
//! compressor+crypter combinations   .gz.aes  .zst.aes
//! compressors alone                 .gz      .zst
//! crypter alone                     .aes
//! plain                             ""
//! ```
//!
//! When several variants of one logical object coexist, reads always resolve
//! to the highest-priority one.
//!
//! ## Guarantees
//!
//! Multi-variant operations (`delete`, `delete_all_bulk`, `rename`) are
//! best-effort: `NotFound` on a candidate means "nothing to do", any other
//! error is recorded and the loop moves on to the next candidate, and the
//! last recorded error is returned. There is no rollback; callers re-query
//! `exists`/`list` to learn which variants survived. Cancellation stops the
//! loop immediately.
//!
//! `list` is deliberately not deduplicated: two coexisting variants show up
//! as two entries with the same logical name. Use
//! [`VariantStorage::list_distinct`] for a deduplicated view.

use crate::codec::Codec;
use crate::error::{StorageError, StorageResult};
use crate::metadata::FileInfo;
use crate::pipeline::{compress_and_encrypt, decrypt_and_decompress};
use crate::storage::{to_slash, ByteStream, Storage};
use crate::streaming::Crypter;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The transforms available to a storage instance.
///
/// Compressors are listed in the order they should rank inside each
/// priority tier. Immutable once handed to [`VariantStorage::new`].
#[derive(Clone, Default)]
pub struct Algorithms {
    compressors: Vec<Arc<dyn Codec>>,
    crypter: Option<Arc<dyn Crypter>>,
}

impl Algorithms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compressor(mut self, codec: Arc<dyn Codec>) -> Self {
        self.compressors.push(codec);
        self
    }

    pub fn with_crypter(mut self, crypter: Arc<dyn Crypter>) -> Self {
        self.crypter = Some(crypter);
        self
    }

    pub fn compressors(&self) -> &[Arc<dyn Codec>] {
        &self.compressors
    }

    pub fn crypter(&self) -> Option<&Arc<dyn Crypter>> {
        self.crypter.as_ref()
    }

    /// Builds the priority table, most-transformed first and plain last.
    fn variants(&self) -> StorageResult<Vec<Variant>> {
        let mut seen = HashSet::new();
        let tags = self
            .compressors
            .iter()
            .map(|c| c.file_extension())
            .chain(self.crypter.iter().map(|c| c.file_extension()));
        for tag in tags {
            validate_tag(tag)?;
            if !seen.insert(tag) {
                return Err(StorageError::config(format!("duplicate extension {tag:?}")));
            }
        }

        let mut table = Vec::new();
        if let Some(crypter) = &self.crypter {
            for codec in &self.compressors {
                table.push(Variant::new(Some(codec.clone()), Some(crypter.clone())));
            }
        }
        for codec in &self.compressors {
            table.push(Variant::new(Some(codec.clone()), None));
        }
        if let Some(crypter) = &self.crypter {
            table.push(Variant::new(None, Some(crypter.clone())));
        }
        table.push(Variant::new(None, None));
        Ok(table)
    }
}

fn validate_tag(tag: &str) -> StorageResult<()> {
    let well_formed = tag.len() > 1
        && tag.starts_with('.')
        && !tag[1..].contains('.')
        && !tag.contains('/');
    if well_formed {
        Ok(())
    } else {
        Err(StorageError::config(format!(
            "extension {tag:?} must be a single dotted tag like \".gz\""
        )))
    }
}

/// One row of the priority table: a suffix and the transforms it implies.
#[derive(Clone)]
pub struct Variant {
    ext: String,
    codec: Option<Arc<dyn Codec>>,
    crypter: Option<Arc<dyn Crypter>>,
}

impl Variant {
    fn new(codec: Option<Arc<dyn Codec>>, crypter: Option<Arc<dyn Crypter>>) -> Self {
        let mut ext = String::new();
        if let Some(codec) = &codec {
            ext.push_str(codec.file_extension());
        }
        if let Some(crypter) = &crypter {
            ext.push_str(crypter.file_extension());
        }
        Self { ext, codec, crypter }
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn codec(&self) -> Option<&dyn Codec> {
        self.codec.as_deref()
    }

    pub fn crypter(&self) -> Option<&dyn Crypter> {
        self.crypter.as_deref()
    }

    pub fn is_plain(&self) -> bool {
        self.ext.is_empty()
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant")
            .field("ext", &self.ext)
            .field("compressed", &self.codec.is_some())
            .field("encrypted", &self.crypter.is_some())
            .finish()
    }
}

pub struct VariantStorage {
    backend: Arc<dyn Storage>,
    variants: Vec<Variant>,
    write: usize,
}

impl VariantStorage {
    /// Creates the storage; `write_ext` is the suffix used for new writes and
    /// must be producible from `alg` (e.g. `.gz.aes` needs gzip and AES).
    pub fn new(backend: Arc<dyn Storage>, alg: Algorithms, write_ext: &str) -> StorageResult<Self> {
        let variants = alg.variants()?;
        let write = variants
            .iter()
            .position(|v| v.ext == write_ext)
            .ok_or_else(|| {
                let supported: Vec<&str> = variants.iter().map(|v| v.ext.as_str()).collect();
                StorageError::config(format!(
                    "write extension {write_ext:?} not supported by configured algorithms (supported: {supported:?})"
                ))
            })?;
        info!(write_ext, variants = variants.len(), "variant storage ready");
        Ok(Self {
            backend,
            variants,
            write,
        })
    }

    /// Suffixes in read-priority order; the empty suffix is always last.
    pub fn supported_exts(&self) -> Vec<&str> {
        self.variants.iter().map(|v| v.ext.as_str()).collect()
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn write_ext(&self) -> &str {
        &self.variants[self.write].ext
    }

    /// The longest non-empty supported suffix `name` ends with.
    fn explicit_variant(&self, name: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .filter(|v| !v.is_plain() && name.ends_with(v.ext.as_str()))
            .max_by_key(|v| v.ext.len())
    }

    /// Transforms implied by the suffix chain of a physical name. Names
    /// without a recognized suffix decode as plain.
    pub fn transforms_from_name(&self, name: &str) -> &Variant {
        self.explicit_variant(name)
            .unwrap_or_else(|| &self.variants[self.variants.len() - 1])
    }

    fn encode_path(&self, base: &str) -> String {
        format!("{}{}", to_slash(base), self.write_ext())
    }

    /// Strips at most one supported suffix combination, the longest match.
    pub fn decode_path(&self, name: &str) -> String {
        let name = to_slash(name);
        match self.explicit_variant(&name) {
            Some(v) => name[..name.len() - v.ext.len()].to_string(),
            None => name,
        }
    }

    /// Physical name the priority search resolves `base` to, if any variant exists.
    pub async fn resolve(&self, cancel: &CancellationToken, base: &str) -> StorageResult<Option<String>> {
        let base = to_slash(base);
        for variant in &self.variants {
            let candidate = format!("{base}{}", variant.ext);
            if self.backend.exists(cancel, &candidate).await? {
                debug!(base = %base, stored = %candidate, "resolved variant");
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Logical names under `prefix`, with coexisting variants collapsed.
    pub async fn list_distinct(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<BTreeSet<String>> {
        Ok(self.list(cancel, prefix).await?.into_iter().collect())
    }

    async fn open_variant(
        &self,
        cancel: &CancellationToken,
        stored: &str,
        variant: &Variant,
    ) -> StorageResult<ByteStream> {
        let raw = self.backend.get(cancel, stored).await?;
        decrypt_and_decompress(raw, variant.crypter(), variant.codec()).await
    }

    /// Deletes every variant of one logical path.
    async fn delete_variants(&self, cancel: &CancellationToken, base: &str) -> StorageResult<()> {
        let mut last_err = None;
        let mut removed = 0usize;
        for variant in &self.variants {
            let candidate = format!("{base}{}", variant.ext);
            match self.backend.delete(cancel, &candidate).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(path = %candidate, error = %e, "failed to delete variant");
                    last_err = Some(e);
                }
            }
        }
        info!(path = base, removed, "deleted variants");
        last_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Storage for VariantStorage {
    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        reader: ByteStream,
    ) -> StorageResult<()> {
        let path = to_slash(path);
        if let Some(v) = self.explicit_variant(&path) {
            return Err(StorageError::invalid_path(
                path.as_str(),
                format!("logical name ends with reserved extension {:?}", v.ext),
            ));
        }
        let variant = &self.variants[self.write];
        let stored = self.encode_path(&path);
        debug!(path = %path, stored = %stored, "encoding object");

        let transformed = compress_and_encrypt(reader, variant.codec(), variant.crypter()).await?;
        self.backend.put(cancel, &stored, transformed).await?;
        info!(path = %path, stored = %stored, "object stored");
        Ok(())
    }

    async fn get(&self, cancel: &CancellationToken, path: &str) -> StorageResult<ByteStream> {
        let path = to_slash(path);

        if let Some(variant) = self.explicit_variant(&path) {
            debug!(path = %path, ext = %variant.ext, "explicit variant requested");
            return self.open_variant(cancel, &path, variant).await;
        }

        let stored = self
            .resolve(cancel, &path)
            .await?
            .ok_or_else(|| StorageError::not_found(path.as_str()))?;
        let variant = self.transforms_from_name(&stored);
        self.open_variant(cancel, &stored, variant).await
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<Vec<String>> {
        let files = self.backend.list(cancel, &to_slash(prefix)).await?;
        Ok(files.iter().map(|f| self.decode_path(f)).collect())
    }

    async fn list_info(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<Vec<FileInfo>> {
        let mut files = self.backend.list_info(cancel, &to_slash(prefix)).await?;
        for file in &mut files {
            file.path = self.decode_path(&file.path);
        }
        Ok(files)
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        self.delete_variants(cancel, &to_slash(path)).await
    }

    async fn delete_dir(&self, cancel: &CancellationToken, path: &str) -> StorageResult<()> {
        self.backend.delete_dir(cancel, &to_slash(path)).await
    }

    async fn delete_all(&self, cancel: &CancellationToken, prefix: &str) -> StorageResult<()> {
        self.backend.delete_all(cancel, &to_slash(prefix)).await
    }

    async fn delete_all_bulk(
        &self,
        cancel: &CancellationToken,
        paths: &[String],
    ) -> StorageResult<()> {
        let mut last_err = None;
        for path in paths {
            match self.delete_variants(cancel, &to_slash(path)).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        last_err.map_or(Ok(()), Err)
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> StorageResult<bool> {
        Ok(self.resolve(cancel, path).await?.is_some())
    }

    async fn list_top_level_dirs(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<BTreeSet<String>> {
        self.backend.list_top_level_dirs(cancel, &to_slash(prefix)).await
    }

    /// Moves every existing variant of `old_path` to the same suffix under
    /// `new_path`. Either name may be given in logical or physical form.
    async fn rename(
        &self,
        cancel: &CancellationToken,
        old_path: &str,
        new_path: &str,
    ) -> StorageResult<()> {
        let old_base = self.decode_path(old_path);
        let new_base = self.decode_path(new_path);
        if old_base == new_base {
            return Ok(());
        }

        let mut last_err = None;
        let mut moved = 0usize;
        for variant in &self.variants {
            let old_phys = format!("{old_base}{}", variant.ext);
            let new_phys = format!("{new_base}{}", variant.ext);

            match self.backend.exists(cancel, &old_phys).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(path = %old_phys, error = %e, "failed to check variant");
                    last_err = Some(e);
                    continue;
                }
            }

            match self.backend.rename(cancel, &old_phys, &new_phys).await {
                Ok(()) => moved += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(from = %old_phys, to = %new_phys, error = %e, "failed to rename variant");
                    last_err = Some(e);
                }
            }
        }
        info!(from = %old_base, to = %new_base, moved, "renamed variants");
        last_err.map_or(Ok(()), Err)
    }
}
