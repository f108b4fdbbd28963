//! Error types and status codes for key management
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


use crate::key_types::{DomainId, KeyId};
use thiserror::Error;

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Key already exists: domain {domain_id}, key {key_id}")]
    DuplicateKey { domain_id: DomainId, key_id: KeyId },

    #[error("Key not found: domain {domain_id}, key {key_id}")]
    KeyNotFound { domain_id: DomainId, key_id: KeyId },

    #[error("No active key for domain {0}")]
    NoActiveKey(DomainId),

    #[error("Key service not initialized")]
    NotInitialized,

    #[error("Key service already initialized")]
    AlreadyInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeyError {
    /// Collapse this error into the coarse status code of the C-style surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            KeyError::InvalidParam(_) | KeyError::KeyNotFound { .. } => StatusCode::InvalidParam,
            _ => StatusCode::NormalFailure,
        }
    }
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Status codes returned by the process-wide API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    InvalidParam = 1,
    NormalFailure = 2,
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl<T> From<&KeyResult<T>> for StatusCode {
    fn from(result: &KeyResult<T>) -> Self {
        match result {
            Ok(_) => StatusCode::Success,
            Err(e) => e.status_code(),
        }
    }
}
