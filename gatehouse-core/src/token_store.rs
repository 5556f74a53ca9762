//! Typed access to the access and refresh tokens.
//!
//! [`TokenStore`] wraps a [`SecretStore`] and is the only owner of the
//! session's [`Credentials`]. Every read and write goes through a
//! reader/writer guard, so compound operations such as [`TokenStore::clear`]
//! and [`TokenStore::set_tokens`] are atomic as far as other callers of the
//! same `TokenStore` can observe.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::store::{Secret, SecretStore, StoreError};
use crate::token::Credentials;

/// Names of the two storage slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    /// Key holding the access token.
    pub access: String,

    /// Key holding the refresh token.
    pub refresh: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access: "access_token".to_string(),
            refresh: "refresh_token".to_string(),
        }
    }
}

/// Typed accessors for the session credentials.
pub struct TokenStore {
    store: Arc<dyn SecretStore>,
    keys: StorageKeys,
    guard: RwLock<()>,
}

impl TokenStore {
    /// Create a token store over `store` using the default key names.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_keys(store, StorageKeys::default())
    }

    /// Create a token store with custom key names.
    pub fn with_keys(store: Arc<dyn SecretStore>, keys: StorageKeys) -> Self {
        Self {
            store,
            keys,
            guard: RwLock::new(()),
        }
    }

    /// The configured key names.
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Current access token, if any.
    pub async fn access(&self) -> Result<Option<Secret>, StoreError> {
        let _read = self.guard.read().await;
        self.store.get(&self.keys.access).await
    }

    /// Current refresh token, if any.
    pub async fn refresh(&self) -> Result<Option<Secret>, StoreError> {
        let _read = self.guard.read().await;
        self.store.get(&self.keys.refresh).await
    }

    /// Both tokens, read under one guard.
    pub async fn credentials(&self) -> Result<Credentials, StoreError> {
        let _read = self.guard.read().await;
        Ok(Credentials {
            access_token: self.store.get(&self.keys.access).await?,
            refresh_token: self.store.get(&self.keys.refresh).await?,
        })
    }

    /// Replace the access token, leaving the refresh token untouched.
    pub async fn set_access(&self, token: &Secret) -> Result<(), StoreError> {
        let _write = self.guard.write().await;
        self.store.set(&self.keys.access, token).await?;
        tracing::debug!("stored access token under {}", self.keys.access);
        Ok(())
    }

    /// Replace both tokens.
    pub async fn set_tokens(&self, access: &Secret, refresh: &Secret) -> Result<(), StoreError> {
        let _write = self.guard.write().await;
        self.store.set(&self.keys.access, access).await?;
        self.store.set(&self.keys.refresh, refresh).await?;
        tracing::debug!(
            "stored token pair under {}/{}",
            self.keys.access,
            self.keys.refresh
        );
        Ok(())
    }

    /// Erase both tokens.
    ///
    /// Both removals are attempted even if the first fails; the first error
    /// is returned.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _write = self.guard.write().await;
        let access = self.store.remove(&self.keys.access).await;
        let refresh = self.store.remove(&self.keys.refresh).await;
        tracing::info!("cleared stored credentials");
        access.and(refresh)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
