//! Domain-scoped registry of working keys
//!
//! Keys are identified by the pair (domain id, key id). Each domain tracks one
//! current key used for new encryptions: the most recently registered key, for as
//! long as it stays active. Inactive keys remain available for decryption.
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
use crate::key_types::{
    validate_ids, DomainId, KeyId, KeyMaterial, KeyMetadata, KeyRecord, KeySize, KeyState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

type DomainHandle = Arc<RwLock<DomainKeys>>;

#[derive(Debug, Default)]
struct DomainKeys {
    keys: HashMap<KeyId, KeyRecord>,
    current: Option<KeyId>,
    latest_generation: u64,
}

impl DomainKeys {
    /// Track the newest key of the domain and re-derive the current pointer
    fn observe(&mut self, record: &KeyRecord) {
        if record.generation >= self.latest_generation {
            self.latest_generation = record.generation;
            self.current = if record.is_active() {
                Some(record.key_id)
            } else {
                None
            };
        }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> KeyError {
    KeyError::Internal("registry lock poisoned".to_string())
}

/// In-memory key registry shared by the cipher engine and file codec
#[derive(Debug)]
pub struct KeyRegistry {
    key_size: KeySize,
    domains: RwLock<HashMap<DomainId, DomainHandle>>,
    next_generation: AtomicU64,
}

impl KeyRegistry {
    /// Create an empty registry accepting keys of the given size
    pub fn new(key_size: KeySize) -> Self {
        Self {
            key_size,
            domains: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn key_size(&self) -> KeySize {
        self.key_size
    }

    fn domain(&self, domain_id: DomainId) -> KeyResult<Option<DomainHandle>> {
        let domains = self.domains.read().map_err(poisoned)?;
        Ok(domains.get(&domain_id).cloned())
    }

    fn domain_or_insert(&self, domain_id: DomainId) -> KeyResult<DomainHandle> {
        if let Some(domain) = self.domain(domain_id)? {
            return Ok(domain);
        }
        let mut domains = self.domains.write().map_err(poisoned)?;
        Ok(domains.entry(domain_id).or_default().clone())
    }

    /// Validate a registration and build the record it would insert
    ///
    /// Nothing is inserted; pair with [`KeyRegistry::insert`].
    pub fn new_record(
        &self,
        domain_id: DomainId,
        key_id: KeyId,
        material: &[u8],
    ) -> KeyResult<KeyRecord> {
        validate_ids(domain_id, key_id)?;
        self.validate_material(material.len())?;

        if self.contains(domain_id, key_id)? {
            return Err(KeyError::DuplicateKey { domain_id, key_id });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        Ok(KeyRecord::new(
            domain_id,
            key_id,
            KeyMaterial::new(material),
            generation,
        ))
    }

    /// Insert a freshly built active record
    ///
    /// It becomes the domain's current key unless a newer generation is already present.
    pub fn insert(&self, record: KeyRecord) -> KeyResult<KeyMetadata> {
        validate_ids(record.domain_id, record.key_id)?;
        self.validate_material(record.material.len())?;

        let domain = self.domain_or_insert(record.domain_id)?;
        let mut keys = domain.write().map_err(poisoned)?;

        if keys.keys.contains_key(&record.key_id) {
            return Err(KeyError::DuplicateKey {
                domain_id: record.domain_id,
                key_id: record.key_id,
            });
        }

        keys.observe(&record);
        let metadata = record.metadata(keys.current == Some(record.key_id));
        keys.keys.insert(record.key_id, record);

        info!(
            domain_id = metadata.domain_id,
            key_id = metadata.key_id,
            generation = metadata.generation,
            "Registered working key"
        );
        Ok(metadata)
    }

    /// Register a new active key; it becomes the domain's current key
    pub fn register_key(
        &self,
        domain_id: DomainId,
        key_id: KeyId,
        material: &[u8],
    ) -> KeyResult<KeyMetadata> {
        let record = self.new_record(domain_id, key_id, material)?;
        self.insert(record)
    }

    /// Mark a key inactive
    ///
    /// Returns `true` if the state changed, `false` if the key was already inactive.
    pub fn invalidate(&self, domain_id: DomainId, key_id: KeyId) -> KeyResult<bool> {
        self.invalidate_at(domain_id, key_id, chrono::Utc::now().timestamp())
    }

    /// Mark a key inactive, recording the given invalidation time
    pub fn invalidate_at(
        &self,
        domain_id: DomainId,
        key_id: KeyId,
        invalidated_at: i64,
    ) -> KeyResult<bool> {
        validate_ids(domain_id, key_id)?;
        let domain = self
            .domain(domain_id)?
            .ok_or(KeyError::KeyNotFound { domain_id, key_id })?;
        let mut keys = domain.write().map_err(poisoned)?;

        let record = keys
            .keys
            .get_mut(&key_id)
            .ok_or(KeyError::KeyNotFound { domain_id, key_id })?;

        if record.state == KeyState::Inactive {
            debug!(domain_id, key_id, "Key already inactive");
            return Ok(false);
        }

        record.state = KeyState::Inactive;
        record.invalidated_at = Some(invalidated_at);

        if keys.current == Some(key_id) {
            keys.current = None;
            info!(domain_id, key_id, "Invalidated current key; domain has no active key");
        } else {
            info!(domain_id, key_id, "Invalidated key");
        }
        Ok(true)
    }

    /// Load a persisted record, keeping its state
    pub fn restore(&self, record: KeyRecord) -> KeyResult<()> {
        validate_ids(record.domain_id, record.key_id)?;
        self.validate_material(record.material.len())?;

        let domain = self.domain_or_insert(record.domain_id)?;
        let mut keys = domain.write().map_err(poisoned)?;

        if keys.keys.contains_key(&record.key_id) {
            return Err(KeyError::DuplicateKey {
                domain_id: record.domain_id,
                key_id: record.key_id,
            });
        }

        self.next_generation
            .fetch_max(record.generation + 1, Ordering::SeqCst);
        keys.observe(&record);
        keys.keys.insert(record.key_id, record);
        Ok(())
    }

    /// The active key used for new encryptions in a domain
    pub fn current_key(&self, domain_id: DomainId) -> KeyResult<KeyRecord> {
        let domain = self
            .domain(domain_id)?
            .ok_or(KeyError::NoActiveKey(domain_id))?;
        let keys = domain.read().map_err(poisoned)?;

        keys.current
            .and_then(|key_id| keys.keys.get(&key_id))
            .filter(|record| record.is_active())
            .cloned()
            .ok_or(KeyError::NoActiveKey(domain_id))
    }

    /// Any key of a domain, active or not
    pub fn lookup(&self, domain_id: DomainId, key_id: KeyId) -> KeyResult<KeyRecord> {
        let domain = self
            .domain(domain_id)?
            .ok_or(KeyError::KeyNotFound { domain_id, key_id })?;
        let keys = domain.read().map_err(poisoned)?;

        keys.keys
            .get(&key_id)
            .cloned()
            .ok_or(KeyError::KeyNotFound { domain_id, key_id })
    }

    pub fn contains(&self, domain_id: DomainId, key_id: KeyId) -> KeyResult<bool> {
        match self.domain(domain_id)? {
            Some(domain) => {
                let keys = domain.read().map_err(poisoned)?;
                Ok(keys.keys.contains_key(&key_id))
            }
            None => Ok(false),
        }
    }

    /// Snapshot of all key metadata, sorted by (domain, key)
    pub fn list(&self) -> KeyResult<Vec<KeyMetadata>> {
        let handles: Vec<DomainHandle> = {
            let domains = self.domains.read().map_err(poisoned)?;
            domains.values().cloned().collect()
        };

        let mut listed = Vec::new();
        for domain in handles {
            let keys = domain.read().map_err(poisoned)?;
            listed.extend(
                keys.keys
                    .values()
                    .map(|record| record.metadata(keys.current == Some(record.key_id))),
            );
        }
        listed.sort_by_key(|m| (m.domain_id, m.key_id));
        Ok(listed)
    }

    /// Number of registered keys across all domains
    pub fn len(&self) -> KeyResult<usize> {
        let domains = self.domains.read().map_err(poisoned)?;
        let mut total = 0;
        for domain in domains.values() {
            total += domain.read().map_err(poisoned)?.keys.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> KeyResult<bool> {
        Ok(self.len()? == 0)
    }

    fn validate_material(&self, len: usize) -> KeyResult<()> {
        let expected = self.key_size.key_len();
        if len != expected {
            return Err(KeyError::InvalidParam(format!(
                "key length {} does not match expected {}",
                len, expected
            )));
        }
        Ok(())
    }
}
