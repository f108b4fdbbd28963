//! Chunked file encryption
//!
//! Container layout: `"KMCF" | envelope header(9) | nonce base(12)` followed by
//! frames `flags(1) | len(u32 BE) | ciphertext || tag`. Each frame is sealed with a
//! nonce derived from the base and the frame counter; its associated data is the
//! file header, the counter and the flags. Exactly one frame, the last, carries
//! the final flag.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::cipher::{derive_frame_nonce, random_nonce, AesCipher};
use crate::envelope::{EnvelopeHeader, HEADER_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{KeyError, KeyResult};
use crate::key_types::DomainId;
use crate::registry::KeyRegistry;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

pub const FILE_MAGIC: &[u8; 4] = b"KMCF";
pub const FILE_HEADER_LEN: usize = 4 + HEADER_LEN + NONCE_LEN;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

const FLAG_FINAL: u8 = 0x01;

/// Header written at the start of every encrypted file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileHeader {
    key: EnvelopeHeader,
    nonce_base: [u8; NONCE_LEN],
}

impl FileHeader {
    fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut out = [0u8; FILE_HEADER_LEN];
        out[..4].copy_from_slice(FILE_MAGIC);
        out[4..4 + HEADER_LEN].copy_from_slice(&self.key.encode());
        out[4 + HEADER_LEN..].copy_from_slice(&self.nonce_base);
        out
    }

    fn decode(bytes: &[u8; FILE_HEADER_LEN]) -> KeyResult<Self> {
        if &bytes[..4] != FILE_MAGIC {
            return Err(KeyError::Crypto("Not an encrypted file (bad magic)".to_string()));
        }
        let key = EnvelopeHeader::decode(&bytes[4..4 + HEADER_LEN])?;
        let mut nonce_base = [0u8; NONCE_LEN];
        nonce_base.copy_from_slice(&bytes[4 + HEADER_LEN..]);
        Ok(Self { key, nonce_base })
    }

    fn frame_aad(&self, counter: u64, flags: u8) -> Vec<u8> {
        let mut aad = Vec::with_capacity(FILE_HEADER_LEN + 9);
        aad.extend_from_slice(&self.encode());
        aad.extend_from_slice(&counter.to_be_bytes());
        aad.push(flags);
        aad
    }
}

/// Streams files through AES-GCM frames using keys from the registry
#[derive(Debug, Clone)]
pub struct FileCodec {
    registry: Arc<KeyRegistry>,
    chunk_size: usize,
}

impl FileCodec {
    pub fn new(registry: Arc<KeyRegistry>, chunk_size: usize) -> KeyResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(KeyError::InvalidParam(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }
        Ok(Self {
            registry,
            chunk_size,
        })
    }

    /// Encrypt `plain_path` into `cipher_path` under the domain's current key
    ///
    /// Returns the number of plaintext bytes processed. `cipher_path` is only
    /// replaced once the whole file has been written.
    pub async fn encrypt_file(
        &self,
        domain_id: DomainId,
        plain_path: impl AsRef<Path>,
        cipher_path: impl AsRef<Path>,
    ) -> KeyResult<u64> {
        let plain_path = plain_path.as_ref();
        let cipher_path = cipher_path.as_ref();
        let tmp_path = temp_path_for(cipher_path);

        let result = self.encrypt_into(domain_id, plain_path, &tmp_path).await;
        let written = commit(result, &tmp_path, cipher_path).await?;

        info!(
            domain_id,
            source = %plain_path.display(),
            destination = %cipher_path.display(),
            bytes = written,
            "Encrypted file"
        );
        Ok(written)
    }

    /// Decrypt `cipher_path` into `plain_path`
    ///
    /// Returns the number of plaintext bytes recovered.
    pub async fn decrypt_file(
        &self,
        domain_id: DomainId,
        cipher_path: impl AsRef<Path>,
        plain_path: impl AsRef<Path>,
    ) -> KeyResult<u64> {
        let cipher_path = cipher_path.as_ref();
        let plain_path = plain_path.as_ref();
        let tmp_path = temp_path_for(plain_path);

        let result = self.decrypt_into(domain_id, cipher_path, &tmp_path).await;
        let written = commit(result, &tmp_path, plain_path).await?;

        info!(
            domain_id,
            source = %cipher_path.display(),
            destination = %plain_path.display(),
            bytes = written,
            "Decrypted file"
        );
        Ok(written)
    }

    async fn encrypt_into(
        &self,
        domain_id: DomainId,
        plain_path: &Path,
        out_path: &Path,
    ) -> KeyResult<u64> {
        let record = self.registry.current_key(domain_id)?;
        let cipher = AesCipher::new(&record.material)?;
        let header = FileHeader {
            key: EnvelopeHeader {
                domain_id,
                key_id: record.key_id,
            },
            nonce_base: random_nonce(),
        };

        let mut reader = BufReader::new(File::open(plain_path).await?);
        let mut writer = BufWriter::new(File::create(out_path).await?);
        writer.write_all(&header.encode()).await?;

        let mut total = 0u64;
        let mut counter = 0u64;
        let mut current = read_chunk(&mut reader, self.chunk_size).await?;
        loop {
            let next = if current.len() < self.chunk_size {
                Vec::new()
            } else {
                read_chunk(&mut reader, self.chunk_size).await?
            };
            let flags = if next.is_empty() { FLAG_FINAL } else { 0 };

            let nonce = derive_frame_nonce(&header.nonce_base, counter);
            let sealed = cipher.seal(&nonce, &header.frame_aad(counter, flags), &current)?;
            let len = u32::try_from(sealed.len())
                .map_err(|_| KeyError::Internal("frame exceeds u32 length".to_string()))?;

            writer.write_u8(flags).await?;
            writer.write_u32(len).await?;
            writer.write_all(&sealed).await?;
            total += current.len() as u64;

            if flags & FLAG_FINAL != 0 {
                break;
            }
            current = next;
            counter += 1;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        debug!(domain_id, key_id = record.key_id, frames = counter + 1, "Wrote encrypted frames");
        Ok(total)
    }

    async fn decrypt_into(
        &self,
        domain_id: DomainId,
        cipher_path: &Path,
        out_path: &Path,
    ) -> KeyResult<u64> {
        let mut reader = BufReader::new(File::open(cipher_path).await?);

        let mut header_bytes = [0u8; FILE_HEADER_LEN];
        read_exact_or_truncated(&mut reader, &mut header_bytes, "file header").await?;
        let header = FileHeader::decode(&header_bytes)?;

        if header.key.domain_id != domain_id {
            return Err(KeyError::InvalidParam(format!(
                "File was encrypted for domain {}, not {}",
                header.key.domain_id, domain_id
            )));
        }

        let record = self.registry.lookup(domain_id, header.key.key_id)?;
        let cipher = AesCipher::new(&record.material)?;
        let mut writer = BufWriter::new(File::create(out_path).await?);

        let mut total = 0u64;
        let mut counter = 0u64;
        loop {
            let mut frame_head = [0u8; 5];
            read_exact_or_truncated(&mut reader, &mut frame_head, "frame header").await?;
            let flags = frame_head[0];
            if flags & !FLAG_FINAL != 0 {
                return Err(KeyError::Crypto(format!("Unknown frame flags {:#04x}", flags)));
            }
            let len = u32::from_be_bytes([frame_head[1], frame_head[2], frame_head[3], frame_head[4]])
                as usize;
            if !(TAG_LEN..=MAX_CHUNK_SIZE + TAG_LEN).contains(&len) {
                return Err(KeyError::Crypto(format!("Invalid frame length {}", len)));
            }

            let mut sealed = vec![0u8; len];
            read_exact_or_truncated(&mut reader, &mut sealed, "frame").await?;

            let nonce = derive_frame_nonce(&header.nonce_base, counter);
            let plaintext = cipher.open(&nonce, &header.frame_aad(counter, flags), &sealed)?;
            writer.write_all(&plaintext).await?;
            total += plaintext.len() as u64;

            if flags & FLAG_FINAL != 0 {
                break;
            }
            counter += 1;
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing).await? != 0 {
            return Err(KeyError::Crypto("Trailing data after final frame".to_string()));
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        Ok(total)
    }
}

/// Fill up to `size` bytes, stopping early only at end of input
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, size: usize) -> KeyResult<Vec<u8>> {
    let mut chunk = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

async fn read_exact_or_truncated<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> KeyResult<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(KeyError::Crypto(format!(
            "Encrypted file truncated in {}",
            what
        ))),
        Err(e) => Err(KeyError::Io(e)),
    }
}

/// Sibling temporary path so the final rename stays on one filesystem
fn temp_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tmp_name = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4());
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(tmp_name),
        _ => PathBuf::from(tmp_name),
    }
}

/// Move the temporary output into place, or remove it on failure
async fn commit(result: KeyResult<u64>, tmp_path: &Path, destination: &Path) -> KeyResult<u64> {
    match result {
        Ok(written) => {
            if let Err(e) = fs::rename(tmp_path, destination).await {
                discard(tmp_path).await;
                return Err(KeyError::Io(e));
            }
            Ok(written)
        }
        Err(e) => {
            discard(tmp_path).await;
            Err(e)
        }
    }
}

async fn discard(tmp_path: &Path) {
    if let Err(e) = fs::remove_file(tmp_path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %tmp_path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}
