//! Command-line tool for managing working keys and encrypting data
//!
//! Usage:
//!   KMC_KEYSTORE_PATH=./keys KMC_MASTER_KEY=... kmc-keytool register 1 7 <hex key>
//!   kmc-keytool encrypt 1 "hello"
//!
//! Without `KMC_KEYSTORE_PATH`, keys only live for a single invocation.
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


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kmc_config::KmcConfig;
use kmc_keys::{init_key_service, DomainId, KeyId, KeyState};
use kmc_logging::{init_with_format, LogFormat};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kmc-keytool")]
#[command(about = "Domain key registry and AES-GCM encryption tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a working key (hex encoded) for a domain
    Register {
        domain_id: DomainId,
        key_id: KeyId,
        key_hex: String,
    },
    /// Mark a key inactive
    Invalidate { domain_id: DomainId, key_id: KeyId },
    /// List registered keys
    List,
    /// Encrypt text, printing hex ciphertext
    Encrypt { domain_id: DomainId, text: String },
    /// Decrypt hex ciphertext, printing the plaintext
    Decrypt { domain_id: DomainId, ciphertext: String },
    /// Encrypt a file
    EncryptFile {
        domain_id: DomainId,
        source: PathBuf,
        destination: PathBuf,
    },
    /// Decrypt a file
    DecryptFile {
        domain_id: DomainId,
        source: PathBuf,
        destination: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = KmcConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_with_format(
        "kmc-keytool",
        config.log_level(),
        LogFormat::parse(config.log_format()),
    );

    if config.key_store.is_none() {
        warn!("KMC_KEYSTORE_PATH not set; keys will not persist between runs");
    }

    let service = init_key_service(&config)
        .await
        .context("Failed to initialize key service")?;

    match cli.command {
        Commands::Register {
            domain_id,
            key_id,
            key_hex,
        } => {
            let material = hex::decode(key_hex.trim()).context("Key must be hex encoded")?;
            let metadata = service.register_key(domain_id, key_id, &material).await?;
            info!(domain_id, key_id, generation = metadata.generation, "Key registered");
            println!("registered domain={} key={}", domain_id, key_id);
        }
        Commands::Invalidate { domain_id, key_id } => {
            service.invalidate(domain_id, key_id).await?;
            println!("invalidated domain={} key={}", domain_id, key_id);
        }
        Commands::List => {
            for key in service.list_keys()? {
                let state = match key.state {
                    KeyState::Active => "active",
                    KeyState::Inactive => "inactive",
                };
                println!(
                    "domain={} key={} state={}{}",
                    key.domain_id,
                    key.key_id,
                    state,
                    if key.is_current { " current" } else { "" }
                );
            }
        }
        Commands::Encrypt { domain_id, text } => {
            println!("{}", service.encrypt(domain_id, text.as_bytes())?);
        }
        Commands::Decrypt {
            domain_id,
            ciphertext,
        } => {
            let plaintext = service.decrypt(domain_id, &ciphertext)?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Commands::EncryptFile {
            domain_id,
            source,
            destination,
        } => {
            let bytes = service
                .encrypt_file(domain_id, &source, &destination)
                .await
                .with_context(|| format!("Failed to encrypt {}", source.display()))?;
            println!("encrypted {} bytes -> {}", bytes, destination.display());
        }
        Commands::DecryptFile {
            domain_id,
            source,
            destination,
        } => {
            let bytes = service
                .decrypt_file(domain_id, &source, &destination)
                .await
                .with_context(|| format!("Failed to decrypt {}", source.display()))?;
            println!("decrypted {} bytes -> {}", bytes, destination.display());
        }
    }

    Ok(())
}
