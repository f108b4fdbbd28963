//! Process-wide key service with a status-code surface
//!
//! `init` must succeed before any other call; calling it twice fails with
//! `AlreadyInitialized`. Failures are logged and collapsed to a [`StatusCode`]
//! or `None`.
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


use crate::error::{KeyError, KeyResult, StatusCode};
use crate::key_service::KeyService;
use crate::key_types::{DomainId, KeyId};
use crate::service_integration::init_key_service;
use kmc_config::KmcConfig;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::warn;

static SERVICE: OnceLock<Arc<KeyService>> = OnceLock::new();

fn report<T>(operation: &str, result: KeyResult<T>) -> StatusCode {
    let status = StatusCode::from(&result);
    if let Err(e) = result {
        warn!(operation, error = %e, status = status.as_i32(), "Key operation failed");
    }
    status
}

fn report_value<T>(operation: &str, result: KeyResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Key operation failed");
            None
        }
    }
}

/// The installed service, or `NotInitialized`
pub fn service() -> KeyResult<Arc<KeyService>> {
    SERVICE.get().cloned().ok_or(KeyError::NotInitialized)
}

/// Install an already-built service as the process-wide instance
pub fn install(service: Arc<KeyService>) -> KeyResult<()> {
    SERVICE
        .set(service)
        .map_err(|_| KeyError::AlreadyInitialized)
}

/// Build the process-wide service from configuration
pub async fn init(config: &KmcConfig) -> StatusCode {
    let result = async {
        if SERVICE.get().is_some() {
            return Err(KeyError::AlreadyInitialized);
        }
        let service = init_key_service(config).await?;
        install(service)
    }
    .await;
    // Setup failures of any kind are general failures at this surface
    match report("init", result) {
        StatusCode::Success => StatusCode::Success,
        _ => StatusCode::NormalFailure,
    }
}

pub async fn register_key(domain_id: DomainId, key_id: KeyId, material: &[u8]) -> StatusCode {
    let result = match service() {
        Ok(service) => service.register_key(domain_id, key_id, material).await.map(|_| ()),
        Err(e) => Err(e),
    };
    report("register_key", result)
}

pub async fn set_key_invalid(domain_id: DomainId, key_id: KeyId) -> StatusCode {
    let result = match service() {
        Ok(service) => service.invalidate(domain_id, key_id).await,
        Err(e) => Err(e),
    };
    report("set_key_invalid", result)
}

pub fn encrypt(domain_id: DomainId, plaintext: &[u8]) -> Option<String> {
    report_value(
        "encrypt",
        service().and_then(|service| service.encrypt(domain_id, plaintext)),
    )
}

pub fn decrypt(domain_id: DomainId, ciphertext_hex: &str) -> Option<Vec<u8>> {
    report_value(
        "decrypt",
        service().and_then(|service| service.decrypt(domain_id, ciphertext_hex)),
    )
}

pub async fn encrypt_file(
    domain_id: DomainId,
    plain_path: impl AsRef<Path>,
    cipher_path: impl AsRef<Path>,
) -> StatusCode {
    let result = match service() {
        Ok(service) => service
            .encrypt_file(domain_id, plain_path, cipher_path)
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    };
    // Any file failure is a general failure at this surface
    match report("encrypt_file", result) {
        StatusCode::Success => StatusCode::Success,
        _ => StatusCode::NormalFailure,
    }
}

pub async fn decrypt_file(
    domain_id: DomainId,
    cipher_path: impl AsRef<Path>,
    plain_path: impl AsRef<Path>,
) -> StatusCode {
    let result = match service() {
        Ok(service) => service
            .decrypt_file(domain_id, cipher_path, plain_path)
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    };
    match report("decrypt_file", result) {
        StatusCode::Success => StatusCode::Success,
        _ => StatusCode::NormalFailure,
    }
}
