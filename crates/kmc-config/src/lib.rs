//! Configuration management for KMC services and tools

use config::ConfigError;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Default AES key length in bytes (AES-128)
pub const DEFAULT_KEY_LENGTH: usize = 16;

/// Default file codec chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest file codec chunk size in bytes
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Persistent key store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyStoreConfig {
    pub path: PathBuf,
    /// Master key as 64 hex chars or a passphrase
    pub master_key: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KmcConfig {
    pub key_length: usize,
    pub chunk_size: usize,
    pub key_store: Option<KeyStoreConfig>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl Default for KmcConfig {
    fn default() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
            chunk_size: DEFAULT_CHUNK_SIZE,
            key_store: None,
            log_level: Some("info".to_string()),
            log_format: Some("console".to_string()),
        }
    }
}

impl KmcConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_length = match lookup("KMC_KEY_LENGTH") {
            Some(raw) => parse_usize("KMC_KEY_LENGTH", &raw)?,
            None => DEFAULT_KEY_LENGTH,
        };
        if key_length != 16 && key_length != 32 {
            return Err(ConfigError::Message(format!(
                "KMC_KEY_LENGTH must be 16 or 32, got {}",
                key_length
            )));
        }

        let chunk_size = match lookup("KMC_CHUNK_SIZE") {
            Some(raw) => parse_usize("KMC_CHUNK_SIZE", &raw)?,
            None => DEFAULT_CHUNK_SIZE,
        };
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Message(format!(
                "KMC_CHUNK_SIZE must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }

        let key_store = lookup("KMC_KEYSTORE_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(|path| KeyStoreConfig {
                path: PathBuf::from(path),
                master_key: lookup("KMC_MASTER_KEY"),
            });

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_format = lookup("LOG_FORMAT").unwrap_or_else(|| "console".to_string());

        Ok(Self {
            key_length,
            chunk_size,
            key_store,
            log_level: Some(log_level),
            log_format: Some(log_format),
        })
    }

    /// In-memory configuration with the given key length
    pub fn in_memory(key_length: usize) -> Self {
        Self {
            key_length,
            ..Self::default()
        }
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Get log format, defaulting to "console"
    pub fn log_format(&self) -> &str {
        self.log_format.as_deref().unwrap_or("console")
    }
}

fn parse_usize(name: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::Message(format!("{} is not a valid number: {}", name, e)))
}
