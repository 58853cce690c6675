//! Compression capabilities.
//!
//! A [`Codec`] is a compressor/decompressor pair bound to one file extension.
//! The storage layer never inspects compressed bytes; the extension on the
//! physical name is the only signal of which codec produced them.

use crate::error::{StorageError, StorageResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const GZIP_EXT: &str = ".gz";
pub const ZSTD_EXT: &str = ".zst";

pub trait Codec: Send + Sync {
    /// Canonical dotted extension, e.g. `.gz`.
    fn file_extension(&self) -> &str;

    fn compress(&self, data: &[u8]) -> StorageResult<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> StorageResult<Vec<u8>>;
}

/// Gzip via `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: u32,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl GzipCodec {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Codec for GzipCodec {
    fn file_extension(&self) -> &str {
        GZIP_EXT
    }

    fn compress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| StorageError::compression(format!("gzip: {e}")))?;
        encoder
            .finish()
            .map_err(|e| StorageError::compression(format!("gzip: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| StorageError::compression(format!("gunzip: {e}")))?;
        Ok(out)
    }
}

/// Zstandard via `zstd`.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl ZstdCodec {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn file_extension(&self) -> &str {
        ZSTD_EXT
    }

    fn compress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        zstd::stream::encode_all(data, self.level)
            .map_err(|e| StorageError::compression(format!("zstd: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        zstd::stream::decode_all(data)
            .map_err(|e| StorageError::compression(format!("unzstd: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .take(200_000)
            .copied()
            .collect()
    }

    #[test]
    fn test_gzip_round_trip() {
        let codec = GzipCodec::default();
        let data = sample();
        let packed = codec.compress(&data).expect("compress");
        assert!(packed.len() < data.len());
        assert_eq!(codec.decompress(&packed).expect("decompress"), data);
    }

    #[test]
    fn test_zstd_round_trip() {
        let codec = ZstdCodec::with_level(3);
        let data = sample();
        let packed = codec.compress(&data).expect("compress");
        assert!(packed.len() < data.len());
        assert_eq!(codec.decompress(&packed).expect("decompress"), data);
    }

    #[test]
    fn test_empty_input() {
        for codec in [&GzipCodec::default() as &dyn Codec, &ZstdCodec::default()] {
            let packed = codec.compress(b"").expect("compress");
            assert!(codec.decompress(&packed).expect("decompress").is_empty());
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = GzipCodec::default()
            .decompress(b"definitely not gzip")
            .unwrap_err();
        assert!(matches!(err, StorageError::Compression(_)));

        let err = ZstdCodec::default()
            .decompress(b"definitely not zstd")
            .unwrap_err();
        assert!(matches!(err, StorageError::Compression(_)));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(GzipCodec::default().file_extension(), ".gz");
        assert_eq!(ZstdCodec::default().file_extension(), ".zst");
    }
}
