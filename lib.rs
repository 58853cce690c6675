//! # storecrypt - Compressed, Encrypted Object Storage
//!
//! storecrypt puts a uniform storage contract over a backend medium and
//! layers optional compression and encryption on top. Which transforms were
//! applied to an object is encoded in its name suffix, so data written under
//! one configuration stays readable after the configuration changes.
//!
//! ## Features
//!
//! - **Backend contract**: [`Storage`], implemented by a local directory
//!   backend and an in-memory backend
//! - **Compression**: gzip (`.gz`) and zstd (`.zst`)
//! - **Encryption**: chunked AES-256-GCM (`.aes`) or XChaCha20-Poly1305 (`.xc20`)
//! - **Fixed format**: [`TransformingStorage`] always reads and writes one suffix
//! - **Variant resolution**: [`VariantStorage`] writes one suffix but reads
//!   whichever variant has the highest priority
//! - **Cancellation**: every operation takes a `CancellationToken`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::Cursor;
//! use storecrypt::{config::Config, pipeline::read_all, Storage};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Config::new("./storage", "./storecrypt.key");
//!     let storage = cfg.open().await?;
//!     let cancel = CancellationToken::new();
//!
//!     // Stored as wal/0001.gz.aes
//!     storage
//!         .put(&cancel, "wal/0001", Box::new(Cursor::new(b"hello".to_vec())))
//!         .await?;
//!
//!     let data = read_all(storage.get(&cancel, "wal/0001").await?).await?;
//!     assert_eq!(data, b"hello");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod key_manager;
pub mod localfs;
pub mod memory;
pub mod metadata;
pub mod pipeline;
pub mod storage;
pub mod streaming;
pub mod transforming;
pub mod variant;

pub use codec::{Codec, GzipCodec, ZstdCodec};
pub use error::{StorageError, StorageResult};
pub use localfs::{LocalStorage, LocalStorageOpts};
pub use memory::InMemoryStorage;
pub use metadata::FileInfo;
pub use storage::{ByteStream, Storage};
pub use streaming::{Crypter, StreamCrypter};
pub use transforming::TransformingStorage;
pub use variant::{Algorithms, Variant, VariantStorage};
