use anyhow::Result;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use storecrypt::config::{CompressionKind, Config, EncryptionKind};
use storecrypt::key_manager::KeyManager;
use storecrypt::pipeline::read_all;
use storecrypt::streaming::CHUNK_SIZE;
use storecrypt::{
    Algorithms, ByteStream, GzipCodec, LocalStorage, LocalStorageOpts, Storage, StorageError,
    TransformingStorage, VariantStorage, ZstdCodec,
};

fn body(data: &[u8]) -> ByteStream {
    Box::new(Cursor::new(data.to_vec()))
}

/// Local backend in a temp dir plus a fixed key.
async fn setup_test_env() -> Result<(TempDir, Arc<LocalStorage>, KeyManager)> {
    let tmp = TempDir::new()?;
    let backend = LocalStorage::open(LocalStorageOpts::new(tmp.path().join("storage"))).await?;
    Ok((tmp, Arc::new(backend), KeyManager::from_bytes([0x42u8; 32])))
}

fn all_algorithms(km: &KeyManager) -> Algorithms {
    Algorithms::new()
        .with_compressor(Arc::new(GzipCodec::default()))
        .with_compressor(Arc::new(ZstdCodec::default()))
        .with_crypter(Arc::new(km.aes_crypter()))
}

async fn fetch(storage: &dyn Storage, path: &str) -> Result<Vec<u8>> {
    let cancel = CancellationToken::new();
    Ok(read_all(storage.get(&cancel, path).await?).await?)
}

#[tokio::test]
async fn variant_storage_writes_suffixed_files() -> Result<()> {
    let (tmp, backend, km) = setup_test_env().await?;
    let cancel = CancellationToken::new();
    let storage = VariantStorage::new(backend, all_algorithms(&km), ".gz.aes")?;

    storage.put(&cancel, "wal/0001", body(b"hello")).await?;

    let on_disk = tmp.path().join("storage/wal/0001.gz.aes");
    assert!(on_disk.is_file());
    assert_ne!(std::fs::read(&on_disk)?, b"hello");

    assert_eq!(fetch(&storage, "wal/0001").await?, b"hello");
    assert_eq!(fetch(&storage, "wal/0001.gz.aes").await?, b"hello");
    Ok(())
}

#[tokio::test]
async fn configuration_change_keeps_old_data_readable() -> Result<()> {
    let (_tmp, backend, km) = setup_test_env().await?;
    let cancel = CancellationToken::new();
    let large = vec![0xabu8; CHUNK_SIZE * 3 + 5];

    let plain = VariantStorage::new(backend.clone(), Algorithms::new(), "")?;
    plain.put(&cancel, "objs/a", body(b"written plain")).await?;

    let gz = VariantStorage::new(
        backend.clone(),
        Algorithms::new().with_compressor(Arc::new(GzipCodec::default())),
        ".gz",
    )?;
    gz.put(&cancel, "objs/b", body(&large)).await?;

    let current = VariantStorage::new(backend.clone(), all_algorithms(&km), ".zst.aes")?;
    current.put(&cancel, "objs/c", body(b"newest")).await?;

    assert_eq!(fetch(&current, "objs/a").await?, b"written plain");
    assert_eq!(fetch(&current, "objs/b").await?, large);
    assert_eq!(fetch(&current, "objs/c").await?, b"newest");

    let mut files = backend.list(&cancel, "objs").await?;
    files.sort();
    assert_eq!(files, vec!["objs/a", "objs/b.gz", "objs/c.zst.aes"]);
    Ok(())
}

#[tokio::test]
async fn delete_and_rename_cover_all_variants_on_disk() -> Result<()> {
    let (tmp, backend, km) = setup_test_env().await?;
    let cancel = CancellationToken::new();

    for ext in ["", ".gz", ".aes", ".zst.aes"] {
        let writer = VariantStorage::new(backend.clone(), all_algorithms(&km), ext)?;
        writer.put(&cancel, "seg/1", body(ext.as_bytes())).await?;
    }
    let storage = VariantStorage::new(backend.clone(), all_algorithms(&km), ".gz")?;
    assert_eq!(storage.list(&cancel, "seg").await?.len(), 4);
    assert_eq!(storage.list_distinct(&cancel, "seg").await?.len(), 1);
    assert_eq!(fetch(&storage, "seg/1").await?, b".zst.aes");

    storage.rename(&cancel, "seg/1", "moved/1").await?;
    assert!(!storage.exists(&cancel, "seg/1").await?);
    for ext in ["", ".gz", ".aes", ".zst.aes"] {
        assert!(tmp.path().join(format!("storage/moved/1{ext}")).is_file());
    }

    storage.delete(&cancel, "moved/1").await?;
    assert!(storage.list(&cancel, "moved").await?.is_empty());
    assert!(!storage.exists(&cancel, "moved/1").await?);
    Ok(())
}

#[tokio::test]
async fn transforming_storage_over_local_backend() -> Result<()> {
    let (tmp, backend, km) = setup_test_env().await?;
    let cancel = CancellationToken::new();
    let storage = TransformingStorage::new(backend)
        .with_codec(Arc::new(ZstdCodec::default()))
        .with_crypter(Arc::new(km.xchacha_crypter()));

    storage.put(&cancel, "docs/readme", body(b"fixed format")).await?;
    assert!(tmp.path().join("storage/docs/readme.zst.xc20").is_file());
    assert_eq!(storage.list(&cancel, "docs").await?, vec!["docs/readme"]);
    assert_eq!(fetch(&storage, "docs/readme").await?, b"fixed format");

    let err = storage.get(&cancel, "docs/other").await.err().expect("missing");
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn wrong_key_fails_decryption() -> Result<()> {
    let (_tmp, backend, km) = setup_test_env().await?;
    let cancel = CancellationToken::new();
    let writer = VariantStorage::new(backend.clone(), all_algorithms(&km), ".aes")?;
    writer.put(&cancel, "secret", body(b"top secret")).await?;

    let other = KeyManager::from_bytes([0x07u8; 32]);
    let reader = VariantStorage::new(backend, all_algorithms(&other), ".aes")?;
    let err = reader.get(&cancel, "secret").await.err().expect("wrong key");
    assert!(matches!(err, StorageError::Decryption(_)));
    Ok(())
}

#[tokio::test]
async fn cancelled_token_aborts_operations() -> Result<()> {
    let (_tmp, backend, km) = setup_test_env().await?;
    let storage = VariantStorage::new(backend, all_algorithms(&km), ".gz")?;

    let cancel = CancellationToken::new();
    storage.put(&cancel, "x", body(b"x")).await?;
    cancel.cancel();

    assert!(storage.exists(&cancel, "x").await.unwrap_err().is_cancelled());
    assert!(storage.delete(&cancel, "x").await.unwrap_err().is_cancelled());
    assert!(storage
        .put(&cancel, "y", body(b"y"))
        .await
        .unwrap_err()
        .is_cancelled());

    let fresh = CancellationToken::new();
    assert!(storage.exists(&fresh, "x").await?);
    Ok(())
}

#[tokio::test]
async fn config_open_round_trip() -> Result<()> {
    let tmp = TempDir::new()?;
    let config_path = tmp.path().join("storecrypt.json");

    let mut cfg = Config::new(
        tmp.path().join("data").to_string_lossy(),
        tmp.path().join("keys/storecrypt.key").to_string_lossy(),
    );
    cfg.compression = vec![CompressionKind::Zstd];
    cfg.encryption = Some(EncryptionKind::Xchacha);
    cfg.write_ext = ".zst.xc20".into();
    std::fs::write(&config_path, serde_json::to_string_pretty(&cfg)?)?;

    let cancel = CancellationToken::new();
    let first = Config::load(&config_path)?.open().await?;
    first.put(&cancel, "logs/today", body(b"persisted")).await?;
    drop(first);

    // The second open reuses the generated key.
    let second = Config::load(&config_path)?.open().await?;
    assert_eq!(second.supported_exts(), vec![".zst.xc20", ".zst", ".xc20", ""]);
    assert_eq!(fetch(&second, "logs/today").await?, b"persisted");
    assert!(tmp.path().join("data/logs/today.zst.xc20").is_file());
    Ok(())
}
