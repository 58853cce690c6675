//! Fixed-format storage.
//!
//! This module provides [`TransformingStorage`], which always writes and reads
//! exactly one encoding. The physical name of every object is its logical name
//! followed by the compressor extension and then the crypter extension, e.g.
//! `wal/0001` is stored as `wal/0001.gz.aes`.
//!
//! Listings strip that fixed suffix again. Entries that lack it are passed
//! through unchanged.

use crate::codec::Codec;
use crate::error::StorageResult;
use crate::metadata::FileInfo;
use crate::pipeline::{compress_and_encrypt, decrypt_and_decompress};
use crate::storage::{to_slash, ByteStream, Storage};
use crate::streaming::Crypter;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct TransformingStorage {
    backend: Arc<dyn Storage>,
    codec: Option<Arc<dyn Codec>>,
    crypter: Option<Arc<dyn Crypter>>,
    ext: String,
}

impl TransformingStorage {
    /// Plain pass-through storage; add transforms with the `with_*` builders.
    pub fn new(backend: Arc<dyn Storage>) -> Self {
        Self {
            backend,
            codec: None,
            crypter: None,
            ext: String::new(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self.ext = self.compute_ext();
        self
    }

    pub fn with_crypter(mut self, crypter: Arc<dyn Crypter>) -> Self {
        self.crypter = Some(crypter);
        self.ext = self.compute_ext();
        self
    }

    /// The suffix appended to every logical path.
    pub fn file_ext(&self) -> &str {
        &self.ext
    }

    fn compute_ext(&self) -> String {
        let mut ext = String::new();
        if let Some(codec) = &self.codec {
            ext.push_str(codec.file_extension());
        }
        if let Some(crypter) = &self.crypter {
            ext.push_str(crypter.file_extension());
        }
        ext
    }

    fn encode_path(&self, path: &str) -> String {
        to_slash(&format!("{path}{}", self.ext))
    }

    fn decode_path(&self, path: &str) -> String {
        let path = to_slash(path);
        match path.strip_suffix(self.ext.as_str()) {
            Some(base) if !self.ext.is_empty() => base.to_string(),
            _ => path,
        }
    }
}

#[async_trait]
impl Storage for TransformingStorage {
    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        reader: ByteStream,
    ) -> StorageResult<()> {
        let stored = self.encode_path(path);
        debug!(path, stored = %stored, "encoding object");
        let transformed =
            compress_and_encrypt(reader, self.codec.as_deref(), self.crypter.as_deref()).await?;
        self.backend.put(cancel, &stored, transformed).await?;
        info!(path, stored = %stored, "object stored");
        Ok(())
    }

    async fn get(&self, cancel: &CancellationToken, path: &str) -> StorageResult<ByteStream> {
        let stored = self.encode_path(path);
        debug!(path, stored = %stored, "decoding object");
        let raw = self.backend.get(cancel, &stored).await?;
        decrypt_and_decompress(raw, self.crypter.as_deref(), self.codec.as_deref()).await
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
        self.backend.delete(cancel, &self.encode_path(path)).await
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
        let encoded: Vec<String> = paths.iter().map(|p| self.encode_path(p)).collect();
        self.backend.delete_all_bulk(cancel, &encoded).await
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> StorageResult<bool> {
        self.backend.exists(cancel, &self.encode_path(path)).await
    }

    async fn list_top_level_dirs(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> StorageResult<BTreeSet<String>> {
        self.backend
            .list_top_level_dirs(cancel, &to_slash(prefix))
            .await
    }

    async fn rename(
        &self,
        cancel: &CancellationToken,
        old_path: &str,
        new_path: &str,
    ) -> StorageResult<()> {
        let (old_stored, new_stored) = (self.encode_path(old_path), self.encode_path(new_path));
        if old_stored == new_stored {
            return Ok(());
        }
        self.backend.rename(cancel, &old_stored, &new_stored).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{GzipCodec, ZstdCodec};
    use crate::memory::InMemoryStorage;
    use crate::pipeline::read_all;
    use crate::streaming::{StreamCrypter, CHUNK_SIZE};
    use std::io::Cursor;

    const KEY: [u8; 32] = [0x42u8; 32];

    fn body(data: &[u8]) -> ByteStream {
        Box::new(Cursor::new(data.to_vec()))
    }

    fn gzip_aes(mem: &Arc<InMemoryStorage>) -> TransformingStorage {
        TransformingStorage::new(mem.clone())
            .with_codec(Arc::new(GzipCodec::default()))
            .with_crypter(Arc::new(StreamCrypter::aes256gcm(&KEY)))
    }

    #[tokio::test]
    async fn test_suffix_order_is_compression_then_encryption() {
        let mem = Arc::new(InMemoryStorage::new());
        let st = TransformingStorage::new(mem.clone())
            .with_crypter(Arc::new(StreamCrypter::aes256gcm(&KEY)))
            .with_codec(Arc::new(ZstdCodec::default()));
        assert_eq!(st.file_ext(), ".zst.aes");

        let plain = TransformingStorage::new(mem);
        assert_eq!(plain.file_ext(), "");
    }

    #[tokio::test]
    async fn test_round_trip_across_chunk_boundary() {
        let cancel = CancellationToken::new();
        let mem = Arc::new(InMemoryStorage::new());
        let st = gzip_aes(&mem);

        for data in [Vec::new(), vec![7u8; CHUNK_SIZE * 2 + 17]] {
            st.put(&cancel, "wal/0001", body(&data)).await.expect("put");
            assert_eq!(mem.keys(), vec!["wal/0001.gz.aes"]);

            let got = read_all(st.get(&cancel, "wal/0001").await.expect("get"))
                .await
                .expect("read");
            assert_eq!(got, data);
        }
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let cancel = CancellationToken::new();
        let mem = Arc::new(InMemoryStorage::new());
        let st = gzip_aes(&mem);

        let err = st.get(&cancel, "nope").await.err().expect("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_strips_suffix_and_passes_foreign_entries() {
        let cancel = CancellationToken::new();
        let mem = Arc::new(InMemoryStorage::new());
        let st = gzip_aes(&mem);

        st.put(&cancel, "wal/a", body(b"a")).await.expect("put");
        mem.insert_raw("wal/foreign.txt", b"raw".to_vec());

        assert_eq!(
            st.list(&cancel, "wal").await.expect("list"),
            vec!["wal/a", "wal/foreign.txt"]
        );
        let infos = st.list_info(&cancel, "wal").await.expect("list_info");
        assert_eq!(infos[0].path, "wal/a");
    }

    #[tokio::test]
    async fn test_delete_exists_bulk_and_rename_encode_paths() {
        let cancel = CancellationToken::new();
        let mem = Arc::new(InMemoryStorage::new());
        let st = gzip_aes(&mem);

        for name in ["x/1", "x/2", "x/3"] {
            st.put(&cancel, name, body(name.as_bytes())).await.expect("put");
        }
        assert!(st.exists(&cancel, "x/1").await.expect("exists"));
        assert!(!st.exists(&cancel, "x/1.gz.aes").await.expect("exists"));

        st.delete(&cancel, "x/1").await.expect("delete");
        assert!(st.delete(&cancel, "x/1").await.unwrap_err().is_not_found());

        st.rename(&cancel, "x/2", "y/2").await.expect("rename");
        assert_eq!(mem.keys(), vec!["x/3.gz.aes", "y/2.gz.aes"]);

        st.delete_all_bulk(&cancel, &["x/3".into(), "y/2".into()])
            .await
            .expect("bulk");
        assert!(mem.is_empty());
    }

    #[tokio::test]
    async fn test_paths_normalized_to_forward_slashes() {
        let cancel = CancellationToken::new();
        let mem = Arc::new(InMemoryStorage::new());
        let st = gzip_aes(&mem);
        let sep = std::path::MAIN_SEPARATOR;

        st.put(&cancel, &format!("p{sep}d1{sep}a"), body(b"a")).await.expect("put");
        st.put(&cancel, "p/d2/b", body(b"b")).await.expect("put");
        assert_eq!(mem.keys(), vec!["p/d1/a.gz.aes", "p/d2/b.gz.aes"]);

        assert_eq!(
            st.list(&cancel, &format!("p{sep}d1")).await.expect("list"),
            vec!["p/d1/a"]
        );
        let infos = st.list_info(&cancel, &format!("p{sep}d2")).await.expect("list_info");
        assert_eq!(infos[0].path, "p/d2/b");

        let dirs = st
            .list_top_level_dirs(&cancel, &format!("p{sep}"))
            .await
            .expect("dirs");
        assert_eq!(dirs.into_iter().collect::<Vec<_>>(), vec!["p/d1", "p/d2"]);

        st.rename(&cancel, &format!("p{sep}d1{sep}a"), "p/d1/a").await.expect("noop");
        st.delete_dir(&cancel, &format!("p{sep}d1")).await.expect("delete_dir");
        assert_eq!(mem.keys(), vec!["p/d2/b.gz.aes"]);
        st.delete_all(&cancel, &format!("p{sep}")).await.expect("delete_all");
        assert!(mem.is_empty());
    }

    #[tokio::test]
    async fn test_prefix_operations_delegate_unchanged() {
        let cancel = CancellationToken::new();
        let mem = Arc::new(InMemoryStorage::new());
        let st = gzip_aes(&mem);

        st.put(&cancel, "p/d1/a", body(b"a")).await.expect("put");
        st.put(&cancel, "p/d2/b", body(b"b")).await.expect("put");

        let dirs = st.list_top_level_dirs(&cancel, "p").await.expect("dirs");
        assert_eq!(dirs.len(), 2);

        st.delete_dir(&cancel, "p/d1").await.expect("delete_dir");
        assert_eq!(mem.keys(), vec!["p/d2/b.gz.aes"]);

        st.delete_all(&cancel, "p").await.expect("delete_all");
        assert!(mem.is_empty());
    }
}
