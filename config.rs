//! Configuration management with environment variable support.
//!
//! [`Config`] selects the base directory, the key file and the transforms a
//! storage instance knows about, plus the suffix it writes with. It loads from
//! a JSON file and environment variables.
//!
//! ## Environment Variables
//!
//! - `STORECRYPT_CONFIG`: Override config file path
//! - `STORECRYPT_BASE_DIR`: Override storage base directory
//! - `STORECRYPT_KEY_PATH`: Override encryption key file path
//! - `STORECRYPT_WRITE_EXT`: Override the suffix used for new writes

use crate::codec::{Codec, GzipCodec, ZstdCodec};
use crate::key_manager::KeyManager;
use crate::localfs::{LocalStorage, LocalStorageOpts};
use crate::variant::{Algorithms, VariantStorage};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ENV_CONFIG_PATH: &str = "STORECRYPT_CONFIG";
pub const ENV_BASE_DIR: &str = "STORECRYPT_BASE_DIR";
pub const ENV_KEY_PATH: &str = "STORECRYPT_KEY_PATH";
pub const ENV_WRITE_EXT: &str = "STORECRYPT_WRITE_EXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Gzip,
    Zstd,
}

impl CompressionKind {
    fn codec(self) -> Arc<dyn Codec> {
        match self {
            CompressionKind::Gzip => Arc::new(GzipCodec::default()),
            CompressionKind::Zstd => Arc::new(ZstdCodec::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionKind {
    Aes,
    Xchacha,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_dir: String,
    pub key_path: String,
    /// Compressors in read-priority order.
    pub compression: Vec<CompressionKind>,
    pub encryption: Option<EncryptionKind>,
    /// Suffix for new writes, e.g. `.gz.aes`; empty writes plain objects.
    pub write_ext: String,
    pub fsync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: "./storage".to_string(),
            key_path: "./storecrypt.key".to_string(),
            compression: vec![CompressionKind::Gzip, CompressionKind::Zstd],
            encryption: Some(EncryptionKind::Aes),
            write_ext: ".gz.aes".to_string(),
            fsync_on_write: false,
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&s)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides.
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s).with_context(|| format!("parsing config file {}", p))?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base_dir) = env::var(ENV_BASE_DIR) {
            debug!(base_dir = %base_dir, "overriding base_dir from environment");
            self.base_dir = base_dir;
        }
        if let Ok(key_path) = env::var(ENV_KEY_PATH) {
            debug!(key_path = %key_path, "overriding key_path from environment");
            self.key_path = key_path;
        }
        if let Ok(write_ext) = env::var(ENV_WRITE_EXT) {
            debug!(write_ext = %write_ext, "overriding write_ext from environment");
            self.write_ext = write_ext;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.base_dir.trim().is_empty() {
            bail!("base_dir cannot be empty");
        }
        if self.encryption.is_some() && self.key_path.trim().is_empty() {
            bail!("key_path cannot be empty when encryption is enabled");
        }
        for (i, kind) in self.compression.iter().enumerate() {
            if self.compression[..i].contains(kind) {
                bail!("compression {kind:?} listed more than once");
            }
        }

        if self.key_path.contains("..") {
            warn!("key_path contains '..' - consider using absolute paths");
        }
        Ok(())
    }

    pub fn new(base_dir: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            key_path: key_path.into(),
            ..Self::default()
        }
    }

    /// Builds the transform set, loading (or creating) the key when
    /// encryption is configured.
    pub async fn algorithms(&self) -> Result<Algorithms> {
        let mut alg = self
            .compression
            .iter()
            .fold(Algorithms::new(), |alg, kind| alg.with_compressor(kind.codec()));

        if let Some(kind) = self.encryption {
            let km = KeyManager::load_or_generate(&self.key_path).await?;
            alg = match kind {
                EncryptionKind::Aes => alg.with_crypter(Arc::new(km.aes_crypter())),
                EncryptionKind::Xchacha => alg.with_crypter(Arc::new(km.xchacha_crypter())),
            };
        }
        Ok(alg)
    }

    /// Opens a variant-resolving storage rooted at `base_dir`.
    pub async fn open(&self) -> Result<VariantStorage> {
        let opts = LocalStorageOpts::new(&self.base_dir).with_fsync(self.fsync_on_write);
        let backend = LocalStorage::open(opts)
            .await
            .with_context(|| format!("opening storage at {}", self.base_dir))?;
        let alg = self.algorithms().await?;
        let storage = VariantStorage::new(Arc::new(backend), alg, &self.write_ext)?;
        Ok(storage)
    }
}
