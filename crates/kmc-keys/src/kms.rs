//! Persistence interface for working keys
//!
//! The registry is the source of truth at runtime; a backend only records
//! registrations and state changes so they survive restarts. Implementations:
//! - Local encrypted directory ([`crate::local_store::LocalKeyStore`])
//! - Future KMS/HSM backends
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


use crate::error::KeyResult;
use crate::key_types::{DomainId, KeyId, KeyMetadata, KeyRecord};
use async_trait::async_trait;

/// Trait for key persistence backends
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Persist a newly registered key and its metadata
    async fn store_record(&self, record: &KeyRecord) -> KeyResult<()>;

    /// Persist the inactive state of an existing key
    async fn mark_inactive(&self, metadata: &KeyMetadata) -> KeyResult<()>;

    /// Load every persisted key with its material
    async fn load_records(&self) -> KeyResult<Vec<KeyRecord>>;

    /// Check if a key has been persisted
    async fn record_exists(&self, domain_id: DomainId, key_id: KeyId) -> bool;
}
