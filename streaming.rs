//! Streaming encryption and decryption capabilities.
//!
//! This module provides the [`Crypter`] capability and [`StreamCrypter`], a
//! chunked AEAD implementation that works with any cipher of the `aead`
//! family. Each stored object is processed in chunks, so authentication
//! holds per chunk and large objects never need a single giant AEAD call.
//!
//! ## Stream Format
//!
//! ```text
//! [version:1][chunk1][chunk2]...
//!
//! Each chunk:
//! [nonce:N][final:1][length:4][encrypted_data]
//! ```
//!
//! `N` is the cipher's nonce size (12 for AES-GCM, 24 for XChaCha20).
//! The chunk index and the final flag are bound as associated data, so
//! chunks cannot be reordered or spliced between positions. Every stream ends
//! with exactly one final chunk (empty when the plaintext length is a
//! multiple of the chunk size); a stream cut at a chunk boundary is rejected.

use crate::error::{StorageError, StorageResult};
use crate::storage::ByteStream;
use aes_gcm::Aes256Gcm;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, Nonce, OsRng, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Plaintext chunk size (64KB)
/// Balances memory usage vs. overhead from per-chunk nonces and tags
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Stream format version
pub const STREAM_VERSION: u8 = 1;

/// Upper bound on one encrypted chunk: plaintext plus a generous tag allowance.
const MAX_SEALED_CHUNK: usize = CHUNK_SIZE + 64;

pub const AES_EXT: &str = ".aes";
pub const XCHACHA_EXT: &str = ".xc20";

/// Encryption capability bound to one file extension.
#[async_trait]
pub trait Crypter: Send + Sync {
    /// Canonical dotted extension, e.g. `.aes`.
    fn file_extension(&self) -> &str;

    async fn encrypt(&self, input: ByteStream) -> StorageResult<ByteStream>;

    async fn decrypt(&self, input: ByteStream) -> StorageResult<ByteStream>;
}

/// Chunked AEAD stream encryption.
pub struct StreamCrypter<A> {
    cipher: A,
    ext: String,
}

impl StreamCrypter<Aes256Gcm> {
    /// AES-256-GCM, extension `.aes`.
    pub fn aes256gcm(key: &[u8; 32]) -> Self {
        Self::new(Aes256Gcm::new(key.into()), AES_EXT)
    }
}

impl StreamCrypter<XChaCha20Poly1305> {
    /// XChaCha20-Poly1305, extension `.xc20`.
    pub fn xchacha20poly1305(key: &[u8; 32]) -> Self {
        Self::new(XChaCha20Poly1305::new(key.into()), XCHACHA_EXT)
    }
}

impl<A> StreamCrypter<A>
where
    A: Aead + AeadCore + Send + Sync,
{
    pub fn new(cipher: A, ext: impl Into<String>) -> Self {
        Self {
            cipher,
            ext: ext.into(),
        }
    }

    /// Encrypts data from reader in chunks, writing to writer.
    /// Returns the number of plaintext bytes consumed.
    pub async fn encrypt_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_u8(STREAM_VERSION).await?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total_bytes = 0u64;
        let mut index = 0u64;

        loop {
            let n = read_full(reader, &mut buffer).await?;
            // A short read means EOF was reached.
            let is_final = n < CHUNK_SIZE;

            let nonce = A::generate_nonce(&mut OsRng);
            let aad = chunk_aad(index, is_final);
            let ciphertext = self
                .cipher
                .encrypt(
                    &nonce,
                    Payload {
                        msg: &buffer[..n],
                        aad: &aad,
                    },
                )
                .map_err(|e| StorageError::encryption(format!("chunk {index}: {e}")))?;

            writer.write_all(&nonce).await?;
            writer.write_u8(u8::from(is_final)).await?;
            writer.write_u32(ciphertext.len() as u32).await?;
            writer.write_all(&ciphertext).await?;

            total_bytes += n as u64;
            index += 1;
            if is_final {
                break;
            }
        }

        writer.flush().await?;
        Ok(total_bytes)
    }

    /// Decrypts the chunked format from reader, writing plaintext to writer.
    /// Returns the number of plaintext bytes produced.
    pub async fn decrypt_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let version = reader.read_u8().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => StorageError::format("missing version byte"),
            _ => StorageError::Io(e),
        })?;
        if version != STREAM_VERSION {
            return Err(StorageError::format(format!(
                "unsupported stream version: {version}"
            )));
        }

        let mut nonce_buf = Nonce::<A>::default();
        let mut total_bytes = 0u64;
        let mut index = 0u64;
        let mut seen_final = false;

        loop {
            let n = read_full(reader, &mut nonce_buf).await?;
            if n == 0 {
                break;
            }
            if seen_final {
                return Err(StorageError::format("trailing data after final chunk"));
            }
            if n < nonce_buf.len() {
                return Err(StorageError::format(format!("truncated nonce in chunk {index}")));
            }

            let is_final = match reader.read_u8().await {
                Ok(0) => false,
                Ok(1) => true,
                Ok(flag) => {
                    return Err(StorageError::format(format!(
                        "invalid final flag {flag} in chunk {index}"
                    )))
                }
                Err(_) => {
                    return Err(StorageError::format(format!("truncated flag in chunk {index}")))
                }
            };

            let chunk_len = reader
                .read_u32()
                .await
                .map_err(|_| StorageError::format(format!("truncated length in chunk {index}")))?
                as usize;
            if chunk_len > MAX_SEALED_CHUNK {
                return Err(StorageError::format(format!(
                    "chunk {index} too large: {chunk_len} bytes"
                )));
            }

            let mut ciphertext = vec![0u8; chunk_len];
            reader
                .read_exact(&mut ciphertext)
                .await
                .map_err(|_| StorageError::format(format!("truncated data in chunk {index}")))?;

            let aad = chunk_aad(index, is_final);
            let plaintext = self
                .cipher
                .decrypt(
                    &nonce_buf,
                    Payload {
                        msg: &ciphertext,
                        aad: &aad,
                    },
                )
                .map_err(|e| StorageError::decryption(format!("chunk {index}: {e}")))?;

            writer.write_all(&plaintext).await?;
            total_bytes += plaintext.len() as u64;
            index += 1;
            seen_final = is_final;
        }

        if !seen_final {
            return Err(StorageError::format(format!(
                "stream ended after {index} chunks without a final chunk"
            )));
        }

        writer.flush().await?;
        Ok(total_bytes)
    }
}

#[async_trait]
impl<A> Crypter for StreamCrypter<A>
where
    A: Aead + AeadCore + Send + Sync,
{
    fn file_extension(&self) -> &str {
        &self.ext
    }

    async fn encrypt(&self, mut input: ByteStream) -> StorageResult<ByteStream> {
        let mut sealed = Vec::new();
        self.encrypt_stream(&mut input, &mut sealed).await?;
        Ok(Box::new(Cursor::new(sealed)))
    }

    async fn decrypt(&self, mut input: ByteStream) -> StorageResult<ByteStream> {
        let mut plain = Vec::new();
        self.decrypt_stream(&mut input, &mut plain).await?;
        Ok(Box::new(Cursor::new(plain)))
    }
}

/// Associated data of one chunk: big-endian index followed by the final flag.
fn chunk_aad(index: u64, is_final: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = u8::from(is_final);
    aad
}

/// Reads until `buf` is full or EOF, returning the bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> StorageResult<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
