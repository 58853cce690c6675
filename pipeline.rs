//! Composition of the optional transforms.
//!
//! Writes run compress then encrypt; reads mirror that with decrypt then
//! decompress. A missing capability skips its step, and with neither present
//! the stream passes through untouched.

use crate::codec::Codec;
use crate::error::StorageResult;
use crate::storage::ByteStream;
use crate::streaming::Crypter;
use std::io::Cursor;
use tokio::io::AsyncReadExt;

pub async fn compress_and_encrypt(
    input: ByteStream,
    codec: Option<&dyn Codec>,
    crypter: Option<&dyn Crypter>,
) -> StorageResult<ByteStream> {
    let stream = match codec {
        Some(codec) => {
            let raw = read_all(input).await?;
            Box::new(Cursor::new(codec.compress(&raw)?)) as ByteStream
        }
        None => input,
    };
    match crypter {
        Some(crypter) => crypter.encrypt(stream).await,
        None => Ok(stream),
    }
}

pub async fn decrypt_and_decompress(
    input: ByteStream,
    crypter: Option<&dyn Crypter>,
    codec: Option<&dyn Codec>,
) -> StorageResult<ByteStream> {
    let stream = match crypter {
        Some(crypter) => crypter.decrypt(input).await?,
        None => input,
    };
    match codec {
        Some(codec) => {
            let packed = read_all(stream).await?;
            Ok(Box::new(Cursor::new(codec.decompress(&packed)?)))
        }
        None => Ok(stream),
    }
}

/// Drains a stream into memory.
pub async fn read_all(mut stream: ByteStream) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}
