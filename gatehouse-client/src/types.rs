use gatehouse_core::{ClassifiedError, ErrorAction, ErrorKind};

/// Errors returned by [`HttpClient`](crate::HttpClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The gateway (or the network) rejected the request.
    #[error(transparent)]
    Api(#[from] ClassifiedError),

    /// The caller cancelled the request before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// The request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// The envelope's `data` did not match the expected type.
    #[error("failed to decode response data: {0}")]
    Decode(#[source] serde_json::Error),

    /// Invalid client configuration or request URL.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// The classified failure, if this is one.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Failure kind, if the gateway or network produced this error.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(|e| e.kind)
    }

    /// Recommended action, if the gateway or network produced this error.
    pub fn action(&self) -> Option<ErrorAction> {
        self.classified().map(|e| e.action)
    }

    /// True if the session ended because the credential refresh failed.
    pub fn is_session_expired(&self) -> bool {
        self.classified().is_some_and(|e| e.is_session_expired())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
