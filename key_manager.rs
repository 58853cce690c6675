//! Encryption key loading and generation.
//!
//! [`KeyManager`] owns the 256-bit key that every crypter in a process is
//! built from. The key lives in a raw 32-byte file; when the file is missing
//! a fresh key is drawn from `OsRng` and written with mode 0600.
//!
//! Key bytes are zeroized on drop.

use crate::streaming::{Crypter, StreamCrypter, AES_EXT, XCHACHA_EXT};
use aes_gcm::Aes256Gcm;
use anyhow::{bail, Context, Result};
use chacha20poly1305::XChaCha20Poly1305;
use rand_core::{OsRng, RngCore};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;

pub struct KeyManager {
    key_bytes: [u8; KEY_LEN],
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Loads the key at `path`, generating and persisting one if absent.
    pub async fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if fs::try_exists(path)
            .await
            .with_context(|| format!("checking existence of {}", path.display()))?
        {
            return Self::load(path).await;
        }

        info!(path = %path.display(), "generating new encryption key");
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating key directory {}", parent.display()))?;
        }
        write_private(path, key).await?;

        Ok(Self { key_bytes: key })
    }

    /// Loads an existing key; a missing file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading encryption key");
        let mut data = fs::read(path)
            .await
            .with_context(|| format!("reading key from {}", path.display()))?;

        if data.len() != KEY_LEN {
            warn!(path = %path.display(), found_bytes = data.len(), "invalid key size");
            let found = data.len();
            data.zeroize();
            bail!(
                "expected {KEY_LEN}-byte key at {} but found {found} bytes",
                path.display()
            );
        }

        let mut key_bytes = [0u8; KEY_LEN];
        key_bytes.copy_from_slice(&data);
        data.zeroize();
        Ok(Self { key_bytes })
    }

    pub fn from_bytes(key_bytes: [u8; KEY_LEN]) -> Self {
        Self { key_bytes }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key_bytes
    }

    pub fn aes_crypter(&self) -> StreamCrypter<Aes256Gcm> {
        StreamCrypter::aes256gcm(&self.key_bytes)
    }

    pub fn xchacha_crypter(&self) -> StreamCrypter<XChaCha20Poly1305> {
        StreamCrypter::xchacha20poly1305(&self.key_bytes)
    }

    /// Crypter for a dotted extension tag (`.aes` or `.xc20`).
    pub fn crypter_for(&self, ext: &str) -> Result<Arc<dyn Crypter>> {
        match ext {
            AES_EXT => Ok(Arc::new(self.aes_crypter())),
            XCHACHA_EXT => Ok(Arc::new(self.xchacha_crypter())),
            other => bail!("unknown encryption extension {other:?}"),
        }
    }
}

async fn write_private(path: &Path, mut key: [u8; KEY_LEN]) -> Result<()> {
    #[cfg(unix)]
    {
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            use std::fs::OpenOptions;
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let res = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path_buf)
                .and_then(|mut f| f.write_all(&key).and_then(|_| f.sync_all()));
            key.zeroize();
            res.with_context(|| format!("writing key to {}", path_buf.display()))
        })
        .await??;
    }
    #[cfg(not(unix))]
    {
        let res = fs::write(path, &key).await;
        key.zeroize();
        res.with_context(|| format!("writing key to {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::read_all;
    use crate::storage::ByteStream;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_generate_then_reload_same_key() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("keys/store.key");

        let first = KeyManager::load_or_generate(&path).await?;
        let second = KeyManager::load_or_generate(&path).await?;
        assert_eq!(first.key(), second.key());
        assert_eq!(std::fs::read(&path)?.len(), KEY_LEN);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path)?.permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_size_key_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("short.key");
        std::fs::write(&path, [1u8; 16])?;

        let err = KeyManager::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("32-byte key"));
        assert!(KeyManager::load(dir.path().join("absent")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_crypters_share_key() -> Result<()> {
        let km = KeyManager::from_bytes([3u8; KEY_LEN]);
        for ext in [AES_EXT, XCHACHA_EXT] {
            let crypter = km.crypter_for(ext)?;
            assert_eq!(crypter.file_extension(), ext);

            let sealed = crypter
                .encrypt(Box::new(Cursor::new(b"keyed".to_vec())) as ByteStream)
                .await?;
            let other = KeyManager::from_bytes([3u8; KEY_LEN]).crypter_for(ext)?;
            assert_eq!(read_all(other.decrypt(sealed).await?).await?, b"keyed");
        }
        assert!(km.crypter_for(".des").is_err());
        Ok(())
    }
}
