use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use gatehouse_core::{
    ClassifiedError, ErrorAction, ErrorClassifier, ErrorCodeTable, MemoryStore, SecretStore,
    StorageKeys, TokenStore, create_store,
};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ClientConfig, StorageBackend};
use crate::normalize::ResponseNormalizer;
use crate::refresh::{RefreshCoordinator, ReplayTurn, Resumption};
use crate::request::{OutgoingRequest, RequestAugmenter, RequestDescriptor, resolve_url};
use crate::session::{NoopSessionListener, SessionListener};
use crate::transport::{RawResponse, ReqwestTransport, Transport, TransportError};
use crate::types::{ClientError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// HTTP client for an envelope-style gateway.
///
/// Every call goes through the same pipeline: the current access token is
/// attached, the response envelope is unwrapped, and failures are
/// classified. A request rejected as unauthorized waits for a shared
/// credential refresh and is replayed once with the new token; callers only
/// see the final outcome.
///
/// # Example
///
/// ```no_run
/// use gatehouse_client::HttpClient;
/// use serde_json::Value;
///
/// #[tokio::main]
/// async fn main() -> gatehouse_client::Result<()> {
///     let client = HttpClient::builder("https://api.example.com/v1").build()?;
///
///     let orders: Value = client.get("/orders", &[("page", "2")]).await?;
///     println!("{}", orders);
///
///     Ok(())
/// }
/// ```
pub struct HttpClient {
    base_url: Url,
    tokens: Arc<TokenStore>,
    augmenter: RequestAugmenter,
    transport: Arc<dyn Transport>,
    normalizer: ResponseNormalizer,
    coordinator: Arc<RefreshCoordinator>,
    listener: Arc<dyn SessionListener>,
    max_refresh_retries: u32,
}

impl HttpClient {
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    /// Build a client from loaded configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        HttpClientBuilder::from_config(config).build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The token store requests are authenticated from.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let mut descriptor = RequestDescriptor::get(path);
        for (key, value) in params {
            descriptor = descriptor.query(*key, *value);
        }
        self.execute(descriptor).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(RequestDescriptor::delete(path)).await
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body).map_err(ClientError::Encode)?;
        self.execute(RequestDescriptor::new(method, path).json(body))
            .await
    }

    /// Run a request and decode the envelope's `data` as `T`.
    pub async fn execute<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> Result<T> {
        let data = self.execute_value(descriptor).await?;
        serde_json::from_value(data).map_err(ClientError::Decode)
    }

    /// Run a request and return the envelope's `data` untouched.
    pub async fn execute_value(&self, descriptor: RequestDescriptor) -> Result<Value> {
        match descriptor.cancel.clone() {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(url = %descriptor.url, "request cancelled by caller");
                    Err(ClientError::Cancelled)
                }
                result = self.dispatch(&descriptor) => result,
            },
            None => self.dispatch(&descriptor).await,
        }
    }

    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<Value> {
        let url = resolve_url(&self.base_url, &descriptor.url, &descriptor.query)
            .map_err(|e| ClientError::Config(format!("invalid request URL {:?}: {}", descriptor.url, e)))?;

        // Observed before the token is read, so a refresh that finishes in
        // between is detected as stale rather than triggering another one.
        let mut epoch = self.coordinator.epoch();
        let mut request = self.augmenter.augment(descriptor, url).await;
        let mut replays = 0;
        let mut turn = None;

        loop {
            let outcome = match turn.take() {
                Some(turn) => self.send_in_turn(&request, turn).await,
                None => self.transport.send(&request).await,
            };
            let status = outcome.as_ref().ok().map(|r| r.status);

            debug!(
                request_id = %request.request_id,
                method = %request.method,
                url = %request.url,
                status = ?status,
                elapsed_ms = request.elapsed().as_millis() as u64,
                replays,
                "request completed"
            );

            let err = match self.normalizer.normalize(outcome) {
                Ok(data) => return Ok(data),
                Err(err) => with_request_id(err, &request),
            };

            match err.action {
                ErrorAction::RefreshAndRetry if replays < self.max_refresh_retries => {
                    replays += 1;
                    match self.coordinator.await_refresh(&request, epoch).await {
                        Resumption::Refreshed { token, turn: next } => {
                            epoch = self.coordinator.epoch();
                            request.set_bearer(&token);
                            turn = Some(next);
                            debug!(request_id = %request.request_id, "replaying with refreshed credentials");
                        }
                        Resumption::Failed(e) => return Err(e.into()),
                    }
                }
                ErrorAction::RefreshAndRetry => {
                    warn!(
                        request_id = %request.request_id,
                        "still unauthorized after refreshing credentials"
                    );
                    return Err(err.with_action(ErrorAction::SurfaceToUser).into());
                }
                ErrorAction::RedirectToLogin => {
                    self.end_session(&request).await;
                    return Err(err.into());
                }
                ErrorAction::SurfaceToUser | ErrorAction::None => return Err(err.into()),
            }
        }
    }

    /// Submit a replay once the waiter ahead of it has submitted.
    ///
    /// The send is polled once before the turn is passed on, so the request
    /// has reached the transport when the next waiter starts.
    async fn send_in_turn(
        &self,
        request: &OutgoingRequest,
        mut turn: ReplayTurn,
    ) -> std::result::Result<RawResponse, TransportError> {
        turn.wait().await;

        let mut send = self.transport.send(request);
        let first = std::future::poll_fn(|cx| {
            Poll::Ready(match send.as_mut().poll(cx) {
                Poll::Ready(outcome) => Some(outcome),
                Poll::Pending => None,
            })
        })
        .await;
        turn.complete();

        match first {
            Some(outcome) => outcome,
            None => send.await,
        }
    }

    /// The gateway says the user must sign in again.
    async fn end_session(&self, request: &OutgoingRequest) {
        info!(request_id = %request.request_id, "sign-in required, clearing credentials");
        if let Err(e) = self.tokens.clear().await {
            warn!("failed to clear credentials: {}", e);
        }
        self.listener.on_session_expired(&request.return_path());
    }
}

fn with_request_id(err: ClassifiedError, request: &OutgoingRequest) -> ClassifiedError {
    if err.request_id.is_some() {
        err
    } else {
        err.with_request_id(request.request_id.clone())
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("coordinator", &self.coordinator)
            .field("max_refresh_retries", &self.max_refresh_retries)
            .finish()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    base_url: String,
    store: Option<Arc<dyn SecretStore>>,
    keys: StorageKeys,
    transport: Option<Arc<dyn Transport>>,
    listener: Option<Arc<dyn SessionListener>>,
    error_codes: ErrorCodeTable,
    refresh_path: String,
    max_refresh_retries: u32,
    timeout: Duration,
}

impl HttpClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            store: None,
            keys: StorageKeys::default(),
            transport: None,
            listener: None,
            error_codes: ErrorCodeTable::default(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            max_refresh_retries: 1,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A builder preset from loaded configuration.
    ///
    /// The keyring backend falls back to memory when no keyring is reachable.
    pub fn from_config(config: &ClientConfig) -> Self {
        let store: Arc<dyn SecretStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Keyring => {
                Arc::from(create_store(true, &config.storage.keyring_service))
            }
        };

        Self::new(config.base_url.clone())
            .store(store)
            .storage_keys(config.storage.keys.clone())
            .error_codes(config.error_codes.clone())
            .refresh_path(config.refresh_path.clone())
            .max_refresh_retries(config.max_refresh_retries)
            .timeout(Duration::from_secs(config.timeout_secs))
    }

    /// Storage backend for tokens. Defaults to [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Key names tokens are stored under.
    pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Replace the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where session-expired notifications go. Defaults to a no-op.
    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn error_codes(mut self, codes: ErrorCodeTable) -> Self {
        self.error_codes = codes;
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// How many times a single request may be replayed after a refresh.
    pub fn max_refresh_retries(mut self, retries: u32) -> Self {
        self.max_refresh_retries = retries;
        self
    }

    /// Timeout for the default transport. Ignored with a custom transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL {:?}: {}", self.base_url, e)))?;
        let refresh_url = resolve_url(&base_url, &self.refresh_path, &[])
            .map_err(|e| ClientError::Config(format!("invalid refresh path {:?}: {}", self.refresh_path, e)))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(self.timeout).map_err(|e| ClientError::Config(e.to_string()))?,
            ),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let listener = self
            .listener
            .unwrap_or_else(|| Arc::new(NoopSessionListener));

        let tokens = Arc::new(TokenStore::with_keys(store, self.keys));
        let normalizer = ResponseNormalizer::new(ErrorClassifier::new(self.error_codes));
        let coordinator = Arc::new(RefreshCoordinator::new(
            tokens.clone(),
            transport.clone(),
            normalizer.clone(),
            listener.clone(),
            refresh_url,
        ));

        Ok(HttpClient {
            base_url,
            augmenter: RequestAugmenter::new(tokens.clone()),
            tokens,
            transport,
            normalizer,
            coordinator,
            listener,
            max_refresh_retries: self.max_refresh_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_bad_base_url() {
        let err = HttpClient::builder("not a url").build().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_builder_defaults() {
        let client = HttpClient::builder("https://api.example.com/v1")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/v1");
        assert_eq!(client.max_refresh_retries, 1);
        assert_eq!(client.coordinator().generation(), 0);
    }

    #[test]
    fn test_from_config_with_memory_backend() {
        let mut config = ClientConfig::default();
        config.base_url = "https://api.example.com".to_string();
        config.storage.backend = StorageBackend::Memory;
        config.max_refresh_retries = 2;

        let client = HttpClient::from_config(&config).unwrap();
        assert_eq!(client.max_refresh_retries, 2);
    }

    #[tokio::test]
    async fn test_invalid_request_url_is_config_error() {
        let client = HttpClient::builder("https://api.example.com")
            .build()
            .unwrap();
        let err = client
            .execute_value(RequestDescriptor::get("http://[::1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
