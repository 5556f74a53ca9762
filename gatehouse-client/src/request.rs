//! Request descriptors and the augmenting step.
//!
//! A [`RequestDescriptor`] is what callers hand to the client. The
//! [`RequestAugmenter`] turns it into an [`OutgoingRequest`]: bearer
//! credential, correlation id, default headers and start timestamps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gatehouse_core::{Secret, TokenStore};
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Header carrying the bearer credential.
pub const AUTHORIZATION: &str = "authorization";
/// Header carrying the request body media type.
pub const CONTENT_TYPE: &str = "content-type";
/// Header correlating a request with server-side logs.
pub const REQUEST_ID: &str = "x-request-id";

const JSON: &str = "application/json";

/// A caller's description of one API call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,

    /// Path relative to the client's base URL, or an absolute URL.
    pub url: String,

    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,

    /// Cancelling this token abandons the request, even while it is queued
    /// behind a credential refresh.
    pub cancel: Option<CancellationToken>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            cancel: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a per-call header. Overrides the defaults of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Abandon the request when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A request ready for the transport.
///
/// Immutable once built, apart from the `Authorization` header, which is
/// rewritten when the request is replayed after a credential refresh.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub request_id: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl OutgoingRequest {
    /// Headers with lowercase names.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The bearer token this request carries, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.header(AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Replace the `Authorization` header with a new bearer token.
    pub fn set_bearer(&mut self, token: &Secret) {
        self.headers.insert(
            AUTHORIZATION.to_string(),
            format!("Bearer {}", token.expose()),
        );
    }

    /// Drop the `Authorization` header.
    pub fn clear_bearer(&mut self) {
        self.headers.remove(AUTHORIZATION);
    }

    /// Path and query of the target, used as the return path after a
    /// forced sign-out.
    pub fn return_path(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    /// Time since the request was augmented.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Resolve `target` against `base` and append `query`.
///
/// Absolute URLs are used as-is. Relative targets are appended to the
/// base URL's path, so `https://api.example.com/v1` + `/users` becomes
/// `https://api.example.com/v1/users`.
pub fn resolve_url(
    base: &Url,
    target: &str,
    query: &[(String, String)],
) -> Result<Url, url::ParseError> {
    let mut url = match Url::parse(target) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let joined = format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                target.trim_start_matches('/')
            );
            Url::parse(&joined)?
        }
        Err(e) => return Err(e),
    };

    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }

    Ok(url)
}

/// Generate a collision-resistant request id: `<unix millis>-<random hex>`.
pub fn generate_request_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..12])
}

/// Builds [`OutgoingRequest`]s with the current credentials attached.
pub struct RequestAugmenter {
    tokens: Arc<TokenStore>,
}

impl RequestAugmenter {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }

    /// Build an outgoing request carrying the current access token.
    ///
    /// A storage failure is logged and the request proceeds unauthenticated.
    pub async fn augment(&self, descriptor: &RequestDescriptor, url: Url) -> OutgoingRequest {
        let mut request = Self::build(descriptor, url);

        match self.tokens.access().await {
            Ok(Some(token)) => request.set_bearer(&token),
            Ok(None) => {
                tracing::trace!(request_id = %request.request_id, "no access token, sending unauthenticated");
            }
            Err(e) => {
                tracing::warn!(request_id = %request.request_id, "failed to read access token: {}", e);
            }
        }

        request
    }

    /// Build an outgoing request without any credential.
    pub fn unauthenticated(descriptor: &RequestDescriptor, url: Url) -> OutgoingRequest {
        Self::build(descriptor, url)
    }

    fn build(descriptor: &RequestDescriptor, url: Url) -> OutgoingRequest {
        let request_id = generate_request_id();

        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE.to_string(), JSON.to_string());
        for (name, value) in &descriptor.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }
        headers.insert(REQUEST_ID.to_string(), request_id.clone());

        OutgoingRequest {
            method: descriptor.method.clone(),
            url,
            headers,
            body: descriptor.body.clone(),
            request_id,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}
