//! High-level key service tying registry, cipher, file codec and persistence together
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


use crate::cipher::CipherEngine;
use crate::error::{KeyError, KeyResult};
use crate::file_codec::FileCodec;
use crate::key_types::{DomainId, KeyId, KeyMetadata, KeySize, KeyState};
use crate::kms::KeyManagementService;
use crate::registry::KeyRegistry;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Shared entry point for key registration and encryption
pub struct KeyService {
    registry: Arc<KeyRegistry>,
    cipher: CipherEngine,
    files: FileCodec,
    backend: Option<Arc<dyn KeyManagementService>>,
    /// Serializes registry mutations with their persistence
    write_lock: Mutex<()>,
}

impl KeyService {
    /// Create an in-memory key service
    pub fn new(key_size: KeySize, chunk_size: usize) -> KeyResult<Self> {
        let registry = Arc::new(KeyRegistry::new(key_size));
        Ok(Self {
            cipher: CipherEngine::new(Arc::clone(&registry)),
            files: FileCodec::new(Arc::clone(&registry), chunk_size)?,
            registry,
            backend: None,
            write_lock: Mutex::new(()),
        })
    }

    /// Create a key service backed by persistent storage, loading every stored key
    pub async fn with_backend(
        key_size: KeySize,
        chunk_size: usize,
        backend: Arc<dyn KeyManagementService>,
    ) -> KeyResult<Self> {
        let mut service = Self::new(key_size, chunk_size)?;

        let records = backend.load_records().await?;
        let loaded = records.len();
        for record in records {
            service.registry.restore(record)?;
        }
        service.backend = Some(backend);

        info!(keys = loaded, "Loaded working keys from key store");
        Ok(service)
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn key_size(&self) -> KeySize {
        self.registry.key_size()
    }

    /// Register a new active key, making it the domain's current key
    pub async fn register_key(
        &self,
        domain_id: DomainId,
        key_id: KeyId,
        material: &[u8],
    ) -> KeyResult<KeyMetadata> {
        let _guard = self.write_lock.lock().await;

        let record = self.registry.new_record(domain_id, key_id, material)?;
        if let Some(backend) = &self.backend {
            backend.store_record(&record).await?;
        }
        self.registry.insert(record)
    }

    /// Mark a key inactive; it stays available for decryption
    pub async fn invalidate(&self, domain_id: DomainId, key_id: KeyId) -> KeyResult<()> {
        let _guard = self.write_lock.lock().await;

        let record = self.registry.lookup(domain_id, key_id)?;
        if !record.is_active() {
            return Ok(());
        }
        // One timestamp for both the persisted and the in-memory state
        let invalidated_at = chrono::Utc::now().timestamp();
        if let Some(backend) = &self.backend {
            let mut metadata = record.metadata(false);
            metadata.state = KeyState::Inactive;
            metadata.invalidated_at = Some(invalidated_at);
            backend.mark_inactive(&metadata).await?;
        }
        self.registry
            .invalidate_at(domain_id, key_id, invalidated_at)?;
        Ok(())
    }

    /// Encrypt a buffer under the domain's current key
    pub fn encrypt(&self, domain_id: DomainId, plaintext: &[u8]) -> KeyResult<String> {
        self.cipher.encrypt(domain_id, plaintext)
    }

    /// Decrypt a buffer produced by [`KeyService::encrypt`]
    pub fn decrypt(&self, domain_id: DomainId, ciphertext_hex: &str) -> KeyResult<Vec<u8>> {
        self.cipher.decrypt(domain_id, ciphertext_hex)
    }

    pub async fn encrypt_file(
        &self,
        domain_id: DomainId,
        plain_path: impl AsRef<Path>,
        cipher_path: impl AsRef<Path>,
    ) -> KeyResult<u64> {
        self.files
            .encrypt_file(domain_id, plain_path, cipher_path)
            .await
    }

    pub async fn decrypt_file(
        &self,
        domain_id: DomainId,
        cipher_path: impl AsRef<Path>,
        plain_path: impl AsRef<Path>,
    ) -> KeyResult<u64> {
        self.files
            .decrypt_file(domain_id, cipher_path, plain_path)
            .await
    }

    /// Metadata of every registered key
    pub fn list_keys(&self) -> KeyResult<Vec<KeyMetadata>> {
        self.registry.list()
    }

    pub fn key_exists(&self, domain_id: DomainId, key_id: KeyId) -> KeyResult<bool> {
        self.registry.contains(domain_id, key_id)
    }

    /// Metadata of a single key
    pub fn get_metadata(&self, domain_id: DomainId, key_id: KeyId) -> KeyResult<KeyMetadata> {
        let record = self.registry.lookup(domain_id, key_id)?;
        let is_current = match self.registry.current_key(domain_id) {
            Ok(current) => current.key_id == key_id,
            Err(KeyError::NoActiveKey(_)) => false,
            Err(e) => return Err(e),
        };
        Ok(record.metadata(is_current))
    }
}
