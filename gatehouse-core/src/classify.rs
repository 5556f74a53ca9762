//! Error classification.
//!
//! [`ErrorClassifier`] is the one place where the backend's error vocabulary
//! (HTTP status codes and envelope business codes) is translated into an
//! [`ErrorKind`] and a recommended [`ErrorAction`]. The business codes come
//! from an [`ErrorCodeTable`] so deployments can match their gateway's
//! contract without touching the mapping logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raw code used for session-expired outcomes after a failed refresh.
pub const SESSION_EXPIRED_CODE: &str = "SESSION_EXPIRED";

/// Raw code used when no response was received.
pub const NETWORK_ERROR_CODE: &str = "NETWORK_ERROR";

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Expired,
    InvalidToken,
    Forbidden,
    RateLimited,
    ServerError,
    BusinessError,
    NetworkError,
}

impl ErrorKind {
    /// True for the 401 class of credential problems.
    pub fn is_credential_problem(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Expired | Self::InvalidToken)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Expired => "expired",
            Self::InvalidToken => "invalid_token",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::BusinessError => "business_error",
            Self::NetworkError => "network_error",
        };
        write!(f, "{}", s)
    }
}

/// What the caller (or the client itself) should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    RefreshAndRetry,
    SurfaceToUser,
    RedirectToLogin,
    None,
}

/// A failure translated into generic terms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {raw_message} ({raw_code})")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub action: ErrorAction,
    pub raw_code: String,
    pub raw_message: String,

    /// HTTP status, when a response was received.
    pub status: Option<u16>,

    /// Correlation id of the request that produced the failure.
    pub request_id: Option<String>,
}

impl ClassifiedError {
    pub fn new(
        kind: ErrorKind,
        action: ErrorAction,
        raw_code: impl Into<String>,
        raw_message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            action,
            raw_code: raw_code.into(),
            raw_message: raw_message.into(),
            status: None,
            request_id: None,
        }
    }

    /// No response was received (DNS, connect, timeout, reset).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NetworkError,
            ErrorAction::SurfaceToUser,
            NETWORK_ERROR_CODE,
            message,
        )
    }

    /// Outcome delivered to every request queued behind a failed refresh.
    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Unauthenticated,
            ErrorAction::RedirectToLogin,
            SESSION_EXPIRED_CODE,
            message,
        )
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Replace the recommended action, keeping everything else.
    pub fn with_action(mut self, action: ErrorAction) -> Self {
        self.action = action;
        self
    }

    pub fn is_session_expired(&self) -> bool {
        self.raw_code == SESSION_EXPIRED_CODE
    }
}

/// Backend business codes, grouped by how they are handled.
///
/// Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCodeTable {
    /// Codes meaning the user must sign in again.
    pub login_required: Vec<String>,

    /// Codes meaning the credential has expired.
    pub token_expired: Vec<String>,

    /// Codes meaning the credential is malformed or revoked.
    pub token_invalid: Vec<String>,

    /// Known application-level rejections. Unknown codes are treated the same.
    pub business: Vec<String>,
}

impl Default for ErrorCodeTable {
    fn default() -> Self {
        fn codes(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        Self {
            login_required: codes(&["LOGIN_REQUIRED", "AUTH_REQUIRED"]),
            token_expired: codes(&["TOKEN_EXPIRED"]),
            token_invalid: codes(&["TOKEN_INVALID", "INVALID_TOKEN"]),
            business: codes(&["TENANT_NOT_FOUND", "RESOURCE_NOT_FOUND"]),
        }
    }
}

impl ErrorCodeTable {
    fn contains(list: &[String], code: &str) -> bool {
        list.iter().any(|c| c == code)
    }

    /// Credential kind a code refers to, if any.
    fn credential_kind(&self, code: &str) -> Option<ErrorKind> {
        if Self::contains(&self.token_expired, code) {
            Some(ErrorKind::Expired)
        } else if Self::contains(&self.token_invalid, code) {
            Some(ErrorKind::InvalidToken)
        } else if Self::contains(&self.login_required, code) {
            Some(ErrorKind::Unauthenticated)
        } else {
            None
        }
    }

    /// True if the code is a listed business rejection.
    pub fn is_known_business(&self, code: &str) -> bool {
        Self::contains(&self.business, code)
    }
}

/// Pure mapping from `(status, code?, message?)` to [`ClassifiedError`].
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    codes: ErrorCodeTable,
}

impl ErrorClassifier {
    pub fn new(codes: ErrorCodeTable) -> Self {
        Self { codes }
    }

    pub fn codes(&self) -> &ErrorCodeTable {
        &self.codes
    }

    /// Classify a failed response.
    ///
    /// `code` and `message` come from the envelope when one was parsed; both
    /// are `None` when classifying on the HTTP status alone.
    pub fn classify(
        &self,
        status: u16,
        code: Option<&str>,
        message: Option<&str>,
    ) -> ClassifiedError {
        let raw_code = code
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP_{}", status));
        let raw_message = message
            .map(str::to_string)
            .unwrap_or_else(|| default_message(status).to_string());

        let (kind, action) = match status {
            401 => (
                code.and_then(|c| self.codes.credential_kind(c))
                    .unwrap_or(ErrorKind::Unauthenticated),
                ErrorAction::RefreshAndRetry,
            ),
            403 => (ErrorKind::Forbidden, ErrorAction::SurfaceToUser),
            429 => (ErrorKind::RateLimited, ErrorAction::SurfaceToUser),
            s if s >= 500 => (ErrorKind::ServerError, ErrorAction::SurfaceToUser),
            _ => match code.and_then(|c| self.codes.credential_kind(c)) {
                Some(kind) => (kind, ErrorAction::RedirectToLogin),
                None => (ErrorKind::BusinessError, ErrorAction::SurfaceToUser),
            },
        };

        ClassifiedError::new(kind, action, raw_code, raw_message).with_status(status)
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 => "bad request",
        401 => "authentication required",
        403 => "access forbidden",
        404 => "not found",
        409 => "conflict",
        422 => "unprocessable entity",
        429 => "too many requests",
        500 => "internal server error",
        502 => "bad gateway",
        503 => "service unavailable",
        504 => "gateway timeout",
        s if s >= 500 => "server error",
        s if (200..300).contains(&s) => "request was not successful",
        _ => "request failed",
    }
}
