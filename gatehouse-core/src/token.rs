//! Credential types.
//!
//! - [`Credentials`] - a snapshot of what the token store currently holds
//! - [`TokenPair`] - tokens issued by the refresh endpoint

use serde::{Deserialize, Serialize};

use crate::store::Secret;

/// The access/refresh token pair held by the token store.
///
/// Either slot may be absent: a fresh install has neither, and a session
/// that was cleared after a failed refresh has neither again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Short-lived bearer credential attached to outgoing requests.
    pub access_token: Option<Secret>,

    /// Long-lived credential exchanged for a new access token.
    pub refresh_token: Option<Secret>,
}

impl Credentials {
    /// True when neither token is present.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Tokens returned in the `data` field of a refresh response.
///
/// `refresh_token` is only present when the backend rotates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: Secret,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
}

impl TokenPair {
    /// Create a token pair without rotation.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
        }
    }

    /// Attach a rotated refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }
}
