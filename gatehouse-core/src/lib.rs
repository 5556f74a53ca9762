//! # Gatehouse Core
//!
//! Building blocks shared by the Gatehouse HTTP access layer.
//!
//! This crate provides:
//! - Credential storage ([`SecretStore`], [`MemoryStore`], and optionally [`KeyringStore`])
//! - [`TokenStore`], the typed owner of the access/refresh token pair
//! - [`Envelope`], the backend's uniform response wrapper
//! - [`ErrorClassifier`], which turns statuses and business codes into
//!   [`ClassifiedError`]s with a recommended action
//!
//! The request pipeline itself (augmenting, transport, refresh coordination)
//! lives in `gatehouse-client`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gatehouse_core::{MemoryStore, Secret, TokenStore};
//!
//! let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
//! tokens.set_tokens(&Secret::new("access"), &Secret::new("refresh")).await?;
//! ```

pub mod classify;
pub mod envelope;
pub mod store;
pub mod token;
pub mod token_store;

// Re-export commonly used types at crate root
pub use classify::{
    ClassifiedError,
    ErrorAction,
    ErrorClassifier,
    ErrorCodeTable,
    ErrorKind,
};

pub use envelope::{Envelope, EnvelopeError};

pub use store::{
    Secret,
    SecretStore,
    StoreError,
    MemoryStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{Credentials, TokenPair};

pub use token_store::{StorageKeys, TokenStore};
