//! Client configuration handling.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use gatehouse_core::{ErrorCodeTable, StorageKeys};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`ClientConfig::base_url`].
pub const BASE_URL_ENV: &str = "GATEHOUSE_BASE_URL";

/// Where tokens are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process only; tokens are lost on exit.
    Memory,

    /// The OS keyring, falling back to memory when unavailable.
    #[default]
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Keyring service name tokens are stored under.
    pub keyring_service: String,

    pub keys: StorageKeys,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            keyring_service: "gatehouse".to_string(),
            keys: StorageKeys::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway base URL; request paths are resolved against it.
    pub base_url: String,

    /// Per-request transport timeout.
    pub timeout_secs: u64,

    /// Path of the refresh endpoint, relative to `base_url`.
    pub refresh_path: String,

    /// How many times one request may be replayed after a refresh.
    pub max_refresh_retries: u32,

    pub storage: StorageConfig,

    pub error_codes: ErrorCodeTable,

    /// Path of the file this was loaded from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            refresh_path: "/auth/refresh".to_string(),
            max_refresh_retries: 1,
            storage: StorageConfig::default(),
            error_codes: ErrorCodeTable::default(),
            config_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load configuration.
///
/// Reads `path` if given (it must exist), otherwise the platform config
/// file if one exists, otherwise defaults. `GATEHOUSE_BASE_URL` overrides
/// the base URL in every case.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => read_config(&path)?,
            _ => ClientConfig::default(),
        },
    };

    if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
        if !base_url.trim().is_empty() {
            tracing::debug!(base_url, "base URL overridden from environment");
            config.base_url = base_url;
        }
    }

    Ok(config)
}

fn read_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: ClientConfig =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.config_path = Some(path.to_path_buf());
    Ok(config)
}

/// `<platform config dir>/gatehouse/client.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gatehouse").map(|d| d.config_dir().join("client.toml"))
}
