//! Local encrypted key storage implementation
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


use crate::error::{KeyError, KeyResult};
use crate::key_types::{DomainId, KeyId, KeyMaterial, KeyMetadata, KeyRecord, KeyState};
use crate::kms::KeyManagementService;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Master key for encrypting stored keys
type MasterKey = Zeroizing<[u8; 32]>;

/// Environment variable holding the master key
pub const MASTER_KEY_ENV: &str = "KMC_MASTER_KEY";

/// Local encrypted key store
pub struct LocalKeyStore {
    /// Storage directory
    storage_path: PathBuf,
    /// Master encryption key (derived from master key or environment)
    master_key: MasterKey,
    /// In-memory cache of key metadata
    metadata_cache: tokio::sync::RwLock<HashMap<(DomainId, KeyId), KeyMetadata>>,
}

impl std::fmt::Debug for LocalKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyStore")
            .field("storage_path", &self.storage_path)
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

impl LocalKeyStore {
    /// Create a new local key store
    ///
    /// # Arguments
    /// * `storage_path` - Directory where encrypted keys will be stored
    /// * `master_key` - Optional 32-byte master key (if None, will derive from environment or generate)
    pub async fn new<P: AsRef<Path>>(
        storage_path: P,
        master_key: Option<&[u8]>,
    ) -> KeyResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();

        // Create storage directory if it doesn't exist
        fs::create_dir_all(&storage_path).await?;

        let master_key = match master_key {
            Some(key) => {
                if key.len() != 32 {
                    return Err(KeyError::Configuration(
                        "Master key must be exactly 32 bytes".to_string(),
                    ));
                }
                let mut mk = Zeroizing::new([0u8; 32]);
                mk.copy_from_slice(key);
                mk
            }
            None => Self::derive_master_key(),
        };

        let store = Self {
            storage_path,
            master_key,
            metadata_cache: tokio::sync::RwLock::new(HashMap::new()),
        };

        store.load_metadata().await?;

        Ok(store)
    }

    /// Create a key store whose master key is given as hex or a passphrase
    pub async fn with_master_secret<P: AsRef<Path>>(
        storage_path: P,
        secret: &str,
    ) -> KeyResult<Self> {
        let master_key = master_key_from_str(secret);
        Self::new(storage_path, Some(master_key.as_slice())).await
    }

    /// Derive master key from environment variable or generate a new one
    fn derive_master_key() -> MasterKey {
        if let Ok(key_str) = std::env::var(MASTER_KEY_ENV) {
            return master_key_from_str(&key_str);
        }

        // Keys written under a random master key are unreadable after restart
        warn!(
            "No {} found, generating a new one. Stored keys will not survive a restart!",
            MASTER_KEY_ENV
        );
        let mut master_key = Zeroizing::new([0u8; 32]);
        use rand::RngCore;
        rand::thread_rng().fill_bytes(master_key.as_mut_slice());
        master_key
    }

    /// Encrypt key value
    fn encrypt_key(&self, key_value: &[u8]) -> KeyResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(&(*self.master_key).into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, key_value)
            .map_err(|e| KeyError::Crypto(format!("Key wrapping failed: {}", e)))?;

        // Prepend nonce to ciphertext
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt key value
    fn decrypt_key(&self, encrypted: &[u8]) -> KeyResult<KeyMaterial> {
        if encrypted.len() < 12 {
            return Err(KeyError::Crypto("Wrapped key too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(&(*self.master_key).into());

        let plaintext = Zeroizing::new(cipher.decrypt(nonce, ciphertext).map_err(|_| {
            KeyError::Configuration(
                "Failed to unwrap stored key (wrong master key?)".to_string(),
            )
        })?);

        Ok(KeyMaterial::new(&plaintext))
    }

    fn file_stem(domain_id: DomainId, key_id: KeyId) -> String {
        format!("d{}_k{}", domain_id, key_id)
    }

    /// Get path for key file
    fn key_path(&self, domain_id: DomainId, key_id: KeyId) -> PathBuf {
        self.storage_path
            .join(format!("{}.key", Self::file_stem(domain_id, key_id)))
    }

    /// Get path for metadata file
    fn metadata_path(&self, domain_id: DomainId, key_id: KeyId) -> PathBuf {
        self.storage_path
            .join(format!("{}.meta", Self::file_stem(domain_id, key_id)))
    }

    /// Load metadata from disk
    async fn load_metadata(&self) -> KeyResult<()> {
        let mut cache = self.metadata_cache.write().await;
        cache.clear();

        let mut entries = fs::read_dir(&self.storage_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "meta") {
                continue;
            }

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read key metadata");
                    continue;
                }
            };
            match serde_json::from_str::<KeyMetadata>(&content) {
                Ok(metadata) => {
                    cache.insert((metadata.domain_id, metadata.key_id), metadata);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse key metadata");
                }
            }
        }

        debug!("Loaded {} key metadata entries", cache.len());
        Ok(())
    }

    /// Save metadata to disk
    async fn save_metadata(&self, metadata: &KeyMetadata) -> KeyResult<()> {
        let path = self.metadata_path(metadata.domain_id, metadata.key_id);
        let json = serde_json::to_string_pretty(metadata)?;
        write_atomic(&path, json.as_bytes()).await?;

        let mut cache = self.metadata_cache.write().await;
        cache.insert((metadata.domain_id, metadata.key_id), metadata.clone());

        Ok(())
    }
}

#[async_trait]
impl KeyManagementService for LocalKeyStore {
    async fn store_record(&self, record: &KeyRecord) -> KeyResult<()> {
        if self.record_exists(record.domain_id, record.key_id).await {
            return Err(KeyError::DuplicateKey {
                domain_id: record.domain_id,
                key_id: record.key_id,
            });
        }

        let encrypted = self.encrypt_key(record.material.as_bytes())?;
        write_atomic(&self.key_path(record.domain_id, record.key_id), &encrypted).await?;

        // Metadata last: a key file without metadata is ignored on load
        self.save_metadata(&record.metadata(false)).await?;

        info!(
            domain_id = record.domain_id,
            key_id = record.key_id,
            "Persisted working key"
        );
        Ok(())
    }

    async fn mark_inactive(&self, metadata: &KeyMetadata) -> KeyResult<()> {
        if !self.record_exists(metadata.domain_id, metadata.key_id).await {
            return Err(KeyError::KeyNotFound {
                domain_id: metadata.domain_id,
                key_id: metadata.key_id,
            });
        }

        let mut updated = metadata.clone();
        updated.state = KeyState::Inactive;
        updated.is_current = false;
        if updated.invalidated_at.is_none() {
            updated.invalidated_at = Some(chrono::Utc::now().timestamp());
        }
        self.save_metadata(&updated).await
    }

    async fn load_records(&self) -> KeyResult<Vec<KeyRecord>> {
        let cache = self.metadata_cache.read().await;
        let mut records = Vec::with_capacity(cache.len());

        for metadata in cache.values() {
            let path = self.key_path(metadata.domain_id, metadata.key_id);
            let encrypted = fs::read(&path).await?;
            let material = self.decrypt_key(&encrypted)?;
            records.push(KeyRecord::from_metadata(metadata.clone(), material));
        }

        records.sort_by_key(|r| r.generation);
        Ok(records)
    }

    async fn record_exists(&self, domain_id: DomainId, key_id: KeyId) -> bool {
        let cache = self.metadata_cache.read().await;
        cache.contains_key(&(domain_id, key_id))
    }
}

/// Interpret a master secret: 64 hex chars are used as-is, anything else is hashed
pub fn master_key_from_str(secret: &str) -> Zeroizing<[u8; 32]> {
    let mut mk = Zeroizing::new([0u8; 32]);
    if let Ok(key_bytes) = hex::decode(secret.trim()) {
        if key_bytes.len() == 32 {
            mk.copy_from_slice(&key_bytes);
            return mk;
        }
    }
    let hash = Sha256::digest(secret.as_bytes());
    mk.copy_from_slice(&hash);
    mk
}

/// Write via a sibling temporary file and rename into place
async fn write_atomic(path: &Path, contents: &[u8]) -> KeyResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(KeyError::Io(e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(KeyError::Io(e));
    }
    Ok(())
}
