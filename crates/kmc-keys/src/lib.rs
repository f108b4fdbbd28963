//! Key-management backed AES encryption
//!
//! Registers per-domain working keys, tracks their active/inactive lifecycle and
//! encrypts buffers and files with AES-GCM under the current key of a domain.
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



pub mod api;
pub mod cipher;
pub mod envelope;
pub mod error;
pub mod file_codec;
pub mod key_service;
pub mod key_types;
pub mod kms;
pub mod local_store;
pub mod registry;
pub mod service_integration;

pub use cipher::CipherEngine;
pub use error::{KeyError, KeyResult, StatusCode};
pub use file_codec::FileCodec;
pub use key_service::KeyService;
pub use key_types::{DomainId, KeyId, KeyMaterial, KeyMetadata, KeyRecord, KeySize, KeyState};
pub use registry::KeyRegistry;
pub use service_integration::*;
