//! Gatehouse Client Library
//!
//! A token-refresh-aware HTTP client for API gateways that wrap every
//! response in a `{ success, data, error }` envelope.
//!
//! # Overview
//!
//! Application code calls [`HttpClient::get`], [`HttpClient::post`] and
//! friends and receives either the unwrapped `data` payload or a single
//! classified error. Everything in between is handled here:
//!
//! - **Credentials**: the current access token is attached as a bearer
//!   credential to each request, with a unique `X-Request-ID`.
//! - **Envelopes**: 2xx responses are unwrapped; `success: false` bodies and
//!   non-2xx statuses are classified by the same [`ErrorClassifier`].
//! - **Refresh**: when the access token is rejected, exactly one refresh
//!   call is made no matter how many requests failed at once. Requests that
//!   expire meanwhile wait in a FIFO queue and are replayed once with the
//!   new token, or all rejected together if the refresh fails.
//! - **Session end**: an unrecoverable session clears stored tokens and
//!   notifies a [`SessionListener`] with the path to return to after login.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatehouse_client::{HttpClient, LogSessionListener, Secret};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> gatehouse_client::Result<()> {
//!     let client = HttpClient::builder("https://api.example.com/v1")
//!         .listener(Arc::new(LogSessionListener))
//!         .build()?;
//!
//!     client
//!         .tokens()
//!         .set_tokens(&Secret::new("access"), &Secret::new("refresh"))
//!         .await
//!         .ok();
//!
//!     let created: Value = client.post("/orders", &json!({ "qty": 2 })).await?;
//!     println!("{}", created);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `keyring-store` (default): persist tokens in the OS keyring

mod client;
pub mod config;
pub mod normalize;
pub mod refresh;
pub mod request;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{HttpClient, HttpClientBuilder};

pub use config::{ClientConfig, ConfigError, StorageBackend, StorageConfig, load_config};
pub use normalize::ResponseNormalizer;
pub use refresh::{RefreshCoordinator, RefreshState, ReplayTurn, Resumption};
pub use request::{OutgoingRequest, RequestAugmenter, RequestDescriptor};
pub use session::{
    FnSessionListener, LogSessionListener, NoopSessionListener, SessionListener, listener_fn,
};
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportError};
pub use types::{ClientError, Result};

pub use gatehouse_core::{
    ClassifiedError, ErrorAction, ErrorClassifier, ErrorCodeTable, ErrorKind, MemoryStore, Secret,
    SecretStore, StorageKeys, TokenStore,
};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_public_api_accessible() {
        let _: RequestDescriptor = RequestDescriptor::get("/ping");
        let _: ErrorCodeTable = ErrorCodeTable::default();
        let _: ClientConfig = ClientConfig::default();
        let _: Arc<dyn SessionListener> = listener_fn(|_| {});
    }
}
