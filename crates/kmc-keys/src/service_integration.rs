//! Wiring a key service from configuration
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
use crate::key_service::KeyService;
use crate::key_types::KeySize;
use crate::kms::KeyManagementService;
use crate::local_store::LocalKeyStore;
use kmc_config::KmcConfig;
use std::sync::Arc;
use tracing::info;

/// Initialize a key service from configuration
///
/// With a key store configured, keys are persisted and reloaded; otherwise
/// the registry lives only in memory.
pub async fn init_key_service(config: &KmcConfig) -> KeyResult<Arc<KeyService>> {
    let key_size = KeySize::from_len(config.key_length)
        .map_err(|e| KeyError::Configuration(e.to_string()))?;

    let service = match &config.key_store {
        Some(store_config) => {
            info!(
                path = %store_config.path.display(),
                key_length = config.key_length,
                "Initializing key service with local key store"
            );
            let store = match &store_config.master_key {
                Some(secret) => {
                    LocalKeyStore::with_master_secret(&store_config.path, secret).await?
                }
                None => LocalKeyStore::new(&store_config.path, None).await?,
            };
            let backend: Arc<dyn KeyManagementService> = Arc::new(store);
            KeyService::with_backend(key_size, config.chunk_size, backend).await?
        }
        None => {
            info!(
                key_length = config.key_length,
                "Initializing in-memory key service"
            );
            KeyService::new(key_size, config.chunk_size)?
        }
    };

    Ok(Arc::new(service))
}
