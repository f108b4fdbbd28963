//! Key type definitions
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
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Logical namespace partitioning keys
pub type DomainId = i32;

/// Identifier of a working key within a domain
pub type KeyId = i32;

/// AES key sizes accepted by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySize {
    /// 16-byte key, AES-128-GCM
    Aes128,
    /// 32-byte key, AES-256-GCM
    Aes256,
}

impl KeySize {
    pub fn key_len(&self) -> usize {
        match self {
            KeySize::Aes128 => 16,
            KeySize::Aes256 => 32,
        }
    }

    pub fn from_len(len: usize) -> KeyResult<Self> {
        match len {
            16 => Ok(KeySize::Aes128),
            32 => Ok(KeySize::Aes256),
            other => Err(KeyError::InvalidParam(format!(
                "Unsupported key length {} (expected 16 or 32)",
                other
            ))),
        }
    }
}

impl Default for KeySize {
    fn default() -> Self {
        KeySize::Aes128
    }
}

/// Lifecycle state of a working key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Usable for encryption and decryption
    Active,
    /// Usable for decryption only
    Inactive,
}

/// Raw key bytes, wiped on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyMaterial").field(&"[REDACTED]").finish()
    }
}

/// A working key owned by the registry
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub domain_id: DomainId,
    pub key_id: KeyId,
    pub material: Arc<KeyMaterial>,
    pub state: KeyState,
    /// Registry-wide registration counter; the highest value in a domain is its latest key
    pub generation: u64,
    pub created_at: i64,
    pub invalidated_at: Option<i64>,
}

impl KeyRecord {
    pub fn new(domain_id: DomainId, key_id: KeyId, material: KeyMaterial, generation: u64) -> Self {
        Self {
            domain_id,
            key_id,
            material: Arc::new(material),
            state: KeyState::Active,
            generation,
            created_at: chrono::Utc::now().timestamp(),
            invalidated_at: None,
        }
    }

    pub fn from_metadata(metadata: KeyMetadata, material: KeyMaterial) -> Self {
        Self {
            domain_id: metadata.domain_id,
            key_id: metadata.key_id,
            material: Arc::new(material),
            state: metadata.state,
            generation: metadata.generation,
            created_at: metadata.created_at,
            invalidated_at: metadata.invalidated_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == KeyState::Active
    }

    pub fn metadata(&self, is_current: bool) -> KeyMetadata {
        KeyMetadata {
            domain_id: self.domain_id,
            key_id: self.key_id,
            state: self.state,
            generation: self.generation,
            created_at: self.created_at,
            invalidated_at: self.invalidated_at,
            is_current,
        }
    }
}

/// Key metadata, safe to log and persist (no key material)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub domain_id: DomainId,
    pub key_id: KeyId,
    pub state: KeyState,
    pub generation: u64,
    pub created_at: i64,
    pub invalidated_at: Option<i64>,
    /// Whether this key is the domain's current encryption key
    #[serde(default)]
    pub is_current: bool,
}

/// Reject negative domain or key identifiers
pub fn validate_ids(domain_id: DomainId, key_id: KeyId) -> KeyResult<()> {
    if domain_id < 0 {
        return Err(KeyError::InvalidParam(format!(
            "domain id must be non-negative, got {}",
            domain_id
        )));
    }
    if key_id < 0 {
        return Err(KeyError::InvalidParam(format!(
            "key id must be non-negative, got {}",
            key_id
        )));
    }
    Ok(())
}
