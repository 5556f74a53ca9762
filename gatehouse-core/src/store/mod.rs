//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for the credential storage collaborator
//! - [`MemoryStore`] - In-memory implementation for tests and short-lived processes
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend based on availability
//!
//! The store is a plain key-value service. Which keys hold which token is
//! decided by [`TokenStore`](crate::token_store::TokenStore), not here.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatehouse_core::store::{MemoryStore, Secret, SecretStore};
//!
//! let store = MemoryStore::new();
//! store.set("access_token", &Secret::new("eyJhbGciOi...")).await?;
//!
//! let retrieved = store.get("access_token").await?;
//! assert_eq!(retrieved.unwrap().expose(), "eyJhbGciOi...");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the stored value was denied.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// The credential storage collaborator.
///
/// Durability and medium are up to the implementation:
/// - [`MemoryStore`] - process memory
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Remove a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without handing out the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Create a credential store with automatic backend selection.
///
/// - If `prefer_keyring` is `true` and the `keyring-store` feature is enabled,
///   tries a [`KeyringStore`] under `service_name` and falls back to
///   [`MemoryStore`] with a warning if the keyring is unavailable.
/// - Otherwise returns a [`MemoryStore`].
pub fn create_store(prefer_keyring: bool, service_name: &str) -> Box<dyn SecretStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new(service_name) {
            Ok(store) => {
                tracing::info!("Using OS keyring for credential storage");
                return Box::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Keyring unavailable ({}), falling back to memory store. \
                     Credentials will not persist across restarts.",
                    e
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "Keyring storage requested for {} but keyring-store feature not enabled. \
             Using memory store.",
            service_name
        );
    }

    tracing::debug!("Using in-memory credential storage");
    Box::new(MemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_serializes_as_plain_string() {
        let secret = Secret::new("abc");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"abc\"");

        let parsed: Secret = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(parsed.into_inner(), "xyz");
    }

    #[tokio::test]
    async fn test_create_store_memory_fallback() {
        let store = create_store(false, "gatehouse-test");

        store.set("test-key", &Secret::new("test")).await.unwrap();
        assert!(store.exists("test-key").await.unwrap());

        store.remove("test-key").await.unwrap();
        assert!(!store.exists("test-key").await.unwrap());
    }
}
