//! AES-GCM primitives and the buffer cipher engine
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


use crate::envelope::{self, EnvelopeHeader, NONCE_LEN, TAG_LEN};
use crate::error::{KeyError, KeyResult};
use crate::key_types::{DomainId, KeyMaterial};
use crate::registry::KeyRegistry;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, warn};

/// AES-GCM instance selected by key length
#[derive(Clone)]
pub enum AesCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl AesCipher {
    pub fn new(material: &KeyMaterial) -> KeyResult<Self> {
        let bytes = material.as_bytes();
        match bytes.len() {
            16 => Aes128Gcm::new_from_slice(bytes)
                .map(AesCipher::Aes128)
                .map_err(|e| KeyError::Crypto(format!("AES-128 key setup failed: {}", e))),
            32 => Aes256Gcm::new_from_slice(bytes)
                .map(AesCipher::Aes256)
                .map_err(|e| KeyError::Crypto(format!("AES-256 key setup failed: {}", e))),
            other => Err(KeyError::InvalidParam(format!(
                "Unsupported key length {}",
                other
            ))),
        }
    }

    /// Encrypt `plaintext`, returning ciphertext with the tag appended
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> KeyResult<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: plaintext, aad };
        let sealed = match self {
            AesCipher::Aes128(cipher) => cipher.encrypt(nonce, payload),
            AesCipher::Aes256(cipher) => cipher.encrypt(nonce, payload),
        };
        sealed.map_err(|e| KeyError::Crypto(format!("Encryption failed: {}", e)))
    }

    /// Decrypt and authenticate ciphertext||tag
    pub fn open(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], sealed: &[u8]) -> KeyResult<Vec<u8>> {
        if sealed.len() < TAG_LEN {
            return Err(KeyError::Crypto("Ciphertext too short".to_string()));
        }
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: sealed, aad };
        let opened = match self {
            AesCipher::Aes128(cipher) => cipher.decrypt(nonce, payload),
            AesCipher::Aes256(cipher) => cipher.decrypt(nonce, payload),
        };
        opened.map_err(|_| KeyError::Crypto("Authentication failed".to_string()))
    }
}

/// Fresh random 96-bit nonce
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Per-frame nonce: the last 8 bytes of `base` XORed with the big-endian counter
pub fn derive_frame_nonce(base: &[u8; NONCE_LEN], counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (slot, byte) in nonce[NONCE_LEN - 8..].iter_mut().zip(counter.to_be_bytes()) {
        *slot ^= byte;
    }
    nonce
}

/// Encrypts and decrypts buffers using keys resolved from the registry
#[derive(Debug, Clone)]
pub struct CipherEngine {
    registry: Arc<KeyRegistry>,
}

impl CipherEngine {
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Encrypt under the domain's current key and return hex-encoded ciphertext
    pub fn encrypt(&self, domain_id: DomainId, plaintext: &[u8]) -> KeyResult<String> {
        let record = self.registry.current_key(domain_id)?;
        let cipher = AesCipher::new(&record.material)?;

        let header = EnvelopeHeader {
            domain_id,
            key_id: record.key_id,
        };
        let aad = header.encode();
        let nonce = random_nonce();
        let sealed = cipher.seal(&nonce, &aad, plaintext)?;

        debug!(
            domain_id,
            key_id = record.key_id,
            plaintext_len = plaintext.len(),
            "Encrypted buffer"
        );
        Ok(hex::encode(envelope::encode(&header, &nonce, &sealed)))
    }

    /// Decrypt hex-encoded ciphertext with the key named in its header
    ///
    /// Inactive keys are accepted so data survives key rotation.
    pub fn decrypt(&self, domain_id: DomainId, ciphertext_hex: &str) -> KeyResult<Vec<u8>> {
        let raw = hex::decode(ciphertext_hex.trim())
            .map_err(|e| KeyError::InvalidParam(format!("Ciphertext is not valid hex: {}", e)))?;
        let parsed = envelope::decode(&raw)?;

        if parsed.header.domain_id != domain_id {
            warn!(
                domain_id,
                ciphertext_domain = parsed.header.domain_id,
                "Ciphertext belongs to another domain"
            );
            return Err(KeyError::InvalidParam(format!(
                "Ciphertext was produced for domain {}, not {}",
                parsed.header.domain_id, domain_id
            )));
        }

        let record = self.registry.lookup(domain_id, parsed.header.key_id)?;
        let cipher = AesCipher::new(&record.material)?;
        let plaintext = cipher.open(&parsed.nonce, &parsed.header.encode(), parsed.sealed)?;

        debug!(
            domain_id,
            key_id = record.key_id,
            plaintext_len = plaintext.len(),
            "Decrypted buffer"
        );
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_types::KeySize;

    fn engine(key_size: KeySize) -> CipherEngine {
        CipherEngine::new(Arc::new(KeyRegistry::new(key_size)))
    }

    #[test]
    fn test_encrypt_decrypt_hello() {
        let engine = engine(KeySize::Aes128);
        engine.registry().register_key(1, 7, &[0x42; 16]).unwrap();

        let ciphertext = engine.encrypt(1, b"hello").unwrap();
        assert!(ciphertext.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(engine.decrypt(1, &ciphertext).unwrap(), b"hello");

        engine.registry().invalidate(1, 7).unwrap();
        assert!(matches!(engine.encrypt(1, b"hello"), Err(KeyError::NoActiveKey(1))));
    }

    #[test]
    fn test_roundtrip_empty_and_aes256() {
        let engine = engine(KeySize::Aes256);
        engine.registry().register_key(3, 1, &[9u8; 32]).unwrap();

        let empty = engine.encrypt(3, b"").unwrap();
        assert_eq!(engine.decrypt(3, &empty).unwrap(), Vec::<u8>::new());

        let data: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let ciphertext = engine.encrypt(3, &data).unwrap();
        assert_eq!(engine.decrypt(3, &ciphertext).unwrap(), data);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let engine = engine(KeySize::Aes128);
        engine.registry().register_key(1, 1, &[1u8; 16]).unwrap();

        let first = engine.encrypt(1, b"same input").unwrap();
        let second = engine.encrypt(1, b"same input").unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.decrypt(1, &first).unwrap(), b"same input");
        assert_eq!(engine.decrypt(1, &second).unwrap(), b"same input");
    }

    #[test]
    fn test_decrypt_after_rotation() {
        let engine = engine(KeySize::Aes128);
        engine.registry().register_key(1, 1, &[1u8; 16]).unwrap();
        let old = engine.encrypt(1, b"before rotation").unwrap();

        engine.registry().invalidate(1, 1).unwrap();
        engine.registry().register_key(1, 2, &[2u8; 16]).unwrap();
        let new = engine.encrypt(1, b"after rotation").unwrap();

        assert_eq!(engine.decrypt(1, &old).unwrap(), b"before rotation");
        assert_eq!(engine.decrypt(1, &new).unwrap(), b"after rotation");
    }

    #[test]
    fn test_decrypt_rejects_bad_input() {
        let engine = engine(KeySize::Aes128);
        engine.registry().register_key(1, 1, &[1u8; 16]).unwrap();
        engine.registry().register_key(2, 1, &[2u8; 16]).unwrap();

        assert!(matches!(engine.decrypt(1, "not hex!"), Err(KeyError::InvalidParam(_))));
        assert!(matches!(engine.decrypt(1, "00ff"), Err(KeyError::Crypto(_))));

        let ciphertext = engine.encrypt(1, b"secret").unwrap();
        assert!(matches!(engine.decrypt(2, &ciphertext), Err(KeyError::InvalidParam(_))));

        let mut tampered = hex::decode(&ciphertext).unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            engine.decrypt(1, &hex::encode(tampered)),
            Err(KeyError::Crypto(_))
        ));
    }

    #[test]
    fn test_decrypt_unknown_key() {
        let source = engine(KeySize::Aes128);
        source.registry().register_key(1, 5, &[5u8; 16]).unwrap();
        let ciphertext = source.encrypt(1, b"orphan").unwrap();

        let other = engine(KeySize::Aes128);
        other.registry().register_key(1, 6, &[5u8; 16]).unwrap();
        assert!(matches!(
            other.decrypt(1, &ciphertext),
            Err(KeyError::KeyNotFound { domain_id: 1, key_id: 5 })
        ));
    }

    #[test]
    fn test_frame_nonce_derivation() {
        let base = [0u8; NONCE_LEN];
        assert_eq!(derive_frame_nonce(&base, 0), base);

        let nonce = derive_frame_nonce(&base, 0x0102);
        assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce[10..], &[0x01, 0x02]);
        assert_ne!(derive_frame_nonce(&base, 1), derive_frame_nonce(&base, 2));
    }
}
