//! The gateway's uniform response envelope.
//!
//! ```json
//! {
//!   "success": false,
//!   "data": null,
//!   "error": { "code": "TOKEN_EXPIRED", "message": "access token expired" },
//!   "message": null,
//!   "request_id": "1718000000000-3f9c2a1b",
//!   "timestamp": "2024-06-10T08:00:00Z"
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error detail carried by a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,

    #[serde(default)]
    pub message: String,
}

/// Response wrapper produced by the backend.
///
/// Parsed once by the normalizer and never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub success: bool,

    #[serde(default)]
    pub data: Option<T>,

    #[serde(default)]
    pub error: Option<EnvelopeError>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Envelope<Value> {
    /// Parse a raw body as an envelope.
    ///
    /// Returns `None` if the body is not JSON or lacks the `success` flag.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

impl<T> Envelope<T> {
    /// Build a success envelope around `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            request_id: None,
            timestamp: None,
        }
    }

    /// Build a failure envelope with a business error code.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(EnvelopeError {
                code: code.into(),
                message: message.into(),
            }),
            message: None,
            request_id: None,
            timestamp: None,
        }
    }

    /// Error code, if the envelope carries one.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Most specific human-readable message available.
    ///
    /// Prefers `error.message`, then the top-level `message`.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .map(|e| e.message.as_str())
            .filter(|m| !m.is_empty())
            .or(self.message.as_deref())
    }
}
