//! Single-flight credential refresh.
//!
//! The [`RefreshCoordinator`] is a two-state machine (`Idle`, `Refreshing`).
//! The first request that comes back unauthorized moves it to `Refreshing`
//! and spawns exactly one refresh task; every request that expires while
//! that task runs is parked in a FIFO wait queue instead of starting its
//! own refresh. When the task finishes the queue is drained in one critical
//! section, either handing each waiter the new access token or rejecting
//! all of them with a session-expired outcome, and the machine returns to
//! `Idle`.
//!
//! Released waiters are chained through [`ReplayTurn`]s: each one submits
//! its replay only after the waiter ahead of it has submitted, so replays
//! reach the transport in queue order on any runtime flavor.
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! `.await`. The refresh itself runs on its own task so that cancelling any
//! single waiter never cancels the refresh the others depend on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gatehouse_core::{ClassifiedError, Secret, TokenPair, TokenStore};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::normalize::ResponseNormalizer;
use crate::request::{OutgoingRequest, RequestAugmenter, RequestDescriptor};
use crate::session::SessionListener;
use crate::transport::Transport;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// A released waiter's place in the replay order.
///
/// [`wait`](Self::wait) resolves once the previous waiter has submitted its
/// replay; [`complete`](Self::complete) lets the next one go. Dropping a
/// turn without completing it also lets the next one go.
#[derive(Debug, Default)]
pub struct ReplayTurn {
    after: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl ReplayTurn {
    /// A turn with no ordering constraint.
    pub fn free() -> Self {
        Self::default()
    }

    /// Wait until the previous waiter has submitted.
    pub async fn wait(&mut self) {
        if let Some(after) = self.after.take() {
            // A dropped predecessor also releases us.
            let _ = after.await;
        }
    }

    /// Mark this waiter's replay as submitted.
    pub fn complete(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// What a waiting request is resumed with.
#[derive(Debug)]
pub enum Resumption {
    /// Replay the request once with this access token, in `turn` order.
    Refreshed { token: Secret, turn: ReplayTurn },

    /// Give up; the session could not be recovered.
    Failed(ClassifiedError),
}

struct Waiter {
    ticket: u64,
    request_id: String,
    tx: oneshot::Sender<Resumption>,
}

struct Inner {
    state: RefreshState,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    generation: u64,
    epoch: u64,
    return_path: Option<String>,
}

/// Owns the refresh protocol for one client.
pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
    tokens: Arc<TokenStore>,
    transport: Arc<dyn Transport>,
    normalizer: ResponseNormalizer,
    listener: Arc<dyn SessionListener>,
    refresh_url: Url,
    refresh_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        tokens: Arc<TokenStore>,
        transport: Arc<dyn Transport>,
        normalizer: ResponseNormalizer,
        listener: Arc<dyn SessionListener>,
        refresh_url: Url,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                queue: VecDeque::new(),
                next_ticket: 0,
                generation: 0,
                epoch: 0,
                return_path: None,
            }),
            tokens,
            transport,
            normalizer,
            listener,
            refresh_url,
            refresh_calls: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.inner.lock().state
    }

    /// Number of successful refreshes so far.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of finished refresh episodes, successful or not.
    ///
    /// Requests record this when they are built; a request that fails with
    /// an older epoch than the current one carried superseded credentials.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Requests currently parked behind a refresh.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Refresh calls sent to the refresh endpoint since construction.
    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Wait for credentials newer than the ones `request` was sent with.
    ///
    /// `seen_epoch` is the epoch observed when `request` was augmented. If
    /// an episode has finished since, this resolves right away: with the
    /// current token if one is stored, or session-expired if the episode
    /// ended the session. Otherwise the request joins the wait queue,
    /// starting a refresh if none is running.
    ///
    /// Dropping the returned future removes the request from the queue.
    pub async fn await_refresh(
        self: &Arc<Self>,
        request: &OutgoingRequest,
        seen_epoch: u64,
    ) -> Resumption {
        let enqueued = {
            let mut inner = self.inner.lock();
            if seen_epoch < inner.epoch {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let ticket = inner.next_ticket;
                inner.next_ticket += 1;
                inner.queue.push_back(Waiter {
                    ticket,
                    request_id: request.request_id.clone(),
                    tx,
                });

                let start = inner.state == RefreshState::Idle;
                if start {
                    inner.state = RefreshState::Refreshing;
                    inner.return_path = Some(request.return_path());
                }
                Some((ticket, rx, start))
            }
        };

        let Some((ticket, rx, start)) = enqueued else {
            debug!(
                request_id = %request.request_id,
                "credentials changed since this request was sent"
            );
            return self.current_token(request).await;
        };

        if start {
            info!(request_id = %request.request_id, "access token rejected, starting refresh");
            let coordinator = Arc::clone(self);
            tokio::spawn(async move { coordinator.run_refresh().await });
        } else {
            debug!(request_id = %request.request_id, "refresh in progress, queued");
        }

        let _guard = QueueGuard {
            coordinator: self,
            ticket,
        };

        match rx.await {
            Ok(resumption) => resumption,
            Err(_) => Resumption::Failed(ClassifiedError::session_expired(
                "credential refresh was abandoned",
            )),
        }
    }

    async fn current_token(&self, request: &OutgoingRequest) -> Resumption {
        let expired = |message: String| {
            Resumption::Failed(
                ClassifiedError::session_expired(message)
                    .with_request_id(request.request_id.clone()),
            )
        };

        match self.tokens.access().await {
            Ok(Some(token)) => Resumption::Refreshed {
                token,
                turn: ReplayTurn::free(),
            },
            Ok(None) => expired("session ended while the request was in flight".to_string()),
            Err(e) => expired(format!("failed to read access token: {}", e)),
        }
    }

    async fn run_refresh(self: Arc<Self>) {
        match self.perform_refresh().await {
            Ok(access_token) => self.release(access_token),
            Err(err) => self.fail(err).await,
        }
    }

    /// Exchange the refresh token for a new access token and persist it.
    async fn perform_refresh(&self) -> Result<Secret, ClassifiedError> {
        let refresh_token = match self.tokens.refresh().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Err(ClassifiedError::session_expired(
                    "no refresh token available",
                ));
            }
            Err(e) => {
                return Err(ClassifiedError::session_expired(format!(
                    "failed to read refresh token: {}",
                    e
                )));
            }
        };

        let descriptor = RequestDescriptor::post(self.refresh_url.as_str())
            .json(json!({ "refresh_token": refresh_token.expose() }));
        let request = RequestAugmenter::unauthenticated(&descriptor, self.refresh_url.clone());

        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        debug!(request_id = %request.request_id, url = %self.refresh_url, "calling refresh endpoint");

        let data = self
            .normalizer
            .normalize(self.transport.send(&request).await)?;

        let pair: TokenPair = serde_json::from_value(data).map_err(|e| {
            ClassifiedError::session_expired(format!("malformed refresh response: {}", e))
        })?;

        let stored = match &pair.refresh_token {
            Some(rotated) => self.tokens.set_tokens(&pair.access_token, rotated).await,
            None => self.tokens.set_access(&pair.access_token).await,
        };
        stored.map_err(|e| {
            ClassifiedError::session_expired(format!("failed to store refreshed tokens: {}", e))
        })?;

        Ok(pair.access_token)
    }

    /// Success: hand every waiter the new token, chained in queue order.
    fn release(&self, access_token: Secret) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.epoch += 1;
        let waiters = std::mem::take(&mut inner.queue);

        info!(
            generation = inner.generation,
            released = waiters.len(),
            "credential refresh succeeded"
        );

        let mut previous: Option<oneshot::Receiver<()>> = None;
        for waiter in waiters {
            let (done, next) = oneshot::channel();
            let resumption = Resumption::Refreshed {
                token: access_token.clone(),
                turn: ReplayTurn {
                    after: previous.take(),
                    done: Some(done),
                },
            };

            match waiter.tx.send(resumption) {
                Ok(()) => previous = Some(next),
                Err(returned) => {
                    debug!(request_id = %waiter.request_id, "waiter went away before release");
                    // Skip the gone waiter without breaking the chain.
                    if let Resumption::Refreshed { mut turn, .. } = returned {
                        previous = turn.after.take();
                    }
                }
            }
        }

        inner.return_path = None;
        inner.state = RefreshState::Idle;
    }

    /// Failure: clear credentials, reject every waiter, then notify once.
    async fn fail(&self, err: ClassifiedError) {
        error!("credential refresh failed: {}", err);

        if let Err(e) = self.tokens.clear().await {
            error!("failed to clear credentials after refresh failure: {}", e);
        }

        let return_path = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            let waiters = std::mem::take(&mut inner.queue);
            for waiter in waiters {
                let outcome = ClassifiedError::session_expired(format!(
                    "session expired: {}",
                    err.raw_message
                ))
                .with_request_id(waiter.request_id.clone());

                if waiter.tx.send(Resumption::Failed(outcome)).is_err() {
                    debug!(request_id = %waiter.request_id, "waiter went away before rejection");
                }
            }
            inner.state = RefreshState::Idle;
            inner.return_path.take()
        };

        self.listener
            .on_session_expired(return_path.as_deref().unwrap_or("/"));
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RefreshCoordinator")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("generation", &inner.generation)
            .field("epoch", &inner.epoch)
            .field("refresh_url", &self.refresh_url.as_str())
            .finish()
    }
}

/// Removes a waiter from the queue if its request is dropped while parked.
struct QueueGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    ticket: u64,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.coordinator.inner.lock();
        let before = inner.queue.len();
        inner.queue.retain(|w| w.ticket != self.ticket);
        if inner.queue.len() < before {
            warn!(ticket = self.ticket, "queued request cancelled before refresh completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::resolve_url;
    use crate::session::{NoopSessionListener, listener_fn};
    use crate::transport::{RawResponse, TransportError};
    use async_trait::async_trait;
    use gatehouse_core::{ErrorAction, MemoryStore};
    use tokio::sync::Notify;

    /// Refresh endpoint that answers once `gate` is notified.
    struct GatedRefresh {
        gate: Arc<Notify>,
        response: RawResponse,
    }

    #[async_trait]
    impl Transport for GatedRefresh {
        async fn send(&self, _request: &OutgoingRequest) -> Result<RawResponse, TransportError> {
            self.gate.notified().await;
            Ok(self.response.clone())
        }
    }

    async fn coordinator_with(
        response: RawResponse,
        listener: Arc<dyn SessionListener>,
    ) -> (Arc<RefreshCoordinator>, Arc<TokenStore>, Arc<Notify>) {
        let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
        tokens
            .set_tokens(&Secret::new("T1"), &Secret::new("R1"))
            .await
            .unwrap();
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(GatedRefresh {
            gate: gate.clone(),
            response,
        });
        let refresh_url = Url::parse("https://api.example.com/auth/refresh").unwrap();
        let coordinator = Arc::new(RefreshCoordinator::new(
            tokens.clone(),
            transport,
            ResponseNormalizer::default(),
            listener,
            refresh_url,
        ));
        (coordinator, tokens, gate)
    }

    async fn coordinator(
        response: RawResponse,
    ) -> (Arc<RefreshCoordinator>, Arc<TokenStore>, Arc<Notify>) {
        coordinator_with(response, Arc::new(NoopSessionListener)).await
    }

    fn request(path: &str) -> OutgoingRequest {
        let base = Url::parse("https://api.example.com").unwrap();
        let descriptor = RequestDescriptor::get(path);
        let url = resolve_url(&base, &descriptor.url, &descriptor.query).unwrap();
        RequestAugmenter::unauthenticated(&descriptor, url)
    }

    async fn wait_queued(coordinator: &RefreshCoordinator, len: usize) {
        while coordinator.queued() < len {
            tokio::task::yield_now().await;
        }
    }

    fn token_of(resumption: Resumption) -> String {
        match resumption {
            Resumption::Refreshed { token, .. } => token.expose().to_string(),
            Resumption::Failed(e) => panic!("unexpected failure: {}", e),
        }
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let (coordinator, _, _) = coordinator(RawResponse::new(200, "")).await;
        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert_eq!(coordinator.generation(), 0);
        assert_eq!(coordinator.epoch(), 0);
        assert_eq!(coordinator.queued(), 0);
    }

    #[tokio::test]
    async fn test_refresh_success_releases_waiter_and_bumps_generation() {
        let body = json!({ "success": true, "data": { "access_token": "T2", "refresh_token": "R2" } });
        let (coordinator, tokens, gate) = coordinator(RawResponse::json(200, &body)).await;

        let waiting = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_refresh(&request("/a"), 0).await })
        };

        wait_queued(&coordinator, 1).await;
        assert_eq!(coordinator.state(), RefreshState::Refreshing);

        gate.notify_one();
        assert_eq!(token_of(waiting.await.unwrap()), "T2");

        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert_eq!(coordinator.generation(), 1);
        assert_eq!(coordinator.epoch(), 1);
        assert_eq!(coordinator.refresh_calls(), 1);
        assert_eq!(tokens.refresh().await.unwrap().unwrap().expose(), "R2");
    }

    #[tokio::test]
    async fn test_released_turns_are_chained_in_queue_order() {
        let body = json!({ "success": true, "data": { "access_token": "T2" } });
        let (coordinator, _, gate) = coordinator(RawResponse::json(200, &body)).await;

        let mut pending = Vec::new();
        for (i, path) in ["/a", "/b", "/c"].into_iter().enumerate() {
            let coordinator_ = coordinator.clone();
            pending.push(tokio::spawn(async move {
                coordinator_.await_refresh(&request(path), 0).await
            }));
            wait_queued(&coordinator, i + 1).await;
        }
        gate.notify_one();

        let mut turns = Vec::new();
        for handle in pending {
            match handle.await.unwrap() {
                Resumption::Refreshed { turn, .. } => turns.push(turn),
                Resumption::Failed(e) => panic!("unexpected failure: {}", e),
            }
        }
        let mut c = turns.pop().unwrap();
        let mut b = turns.pop().unwrap();
        let mut a = turns.pop().unwrap();

        // The first turn is free; the others wait for their predecessor.
        a.wait().await;
        assert!(b.after.as_mut().unwrap().try_recv().is_err());
        a.complete();
        b.wait().await;
        drop(b);
        c.wait().await;
    }

    #[tokio::test]
    async fn test_stale_epoch_skips_refresh() {
        let body = json!({ "success": true, "data": { "access_token": "T2" } });
        let (coordinator, _, gate) = coordinator(RawResponse::json(200, &body)).await;

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_refresh(&request("/a"), 0).await })
        };
        wait_queued(&coordinator, 1).await;
        gate.notify_one();
        first.await.unwrap();

        // Built before the refresh, rejected after it.
        let late = coordinator.await_refresh(&request("/late"), 0).await;
        assert_eq!(token_of(late), "T2");
        assert_eq!(coordinator.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_rejects_and_clears() {
        let (coordinator, tokens, gate) = coordinator(RawResponse::new(400, "")).await;

        let waiting = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_refresh(&request("/a"), 0).await })
        };
        wait_queued(&coordinator, 1).await;
        gate.notify_one();

        match waiting.await.unwrap() {
            Resumption::Failed(e) => {
                assert!(e.is_session_expired());
                assert_eq!(e.action, ErrorAction::RedirectToLogin);
            }
            Resumption::Refreshed { .. } => panic!("expected failure"),
        }
        assert!(tokens.credentials().await.unwrap().is_empty());
        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert_eq!(coordinator.generation(), 0);
        assert_eq!(coordinator.epoch(), 1);

        // A request sent before the failure does not start another episode.
        let late = coordinator.await_refresh(&request("/late"), 0).await;
        assert!(matches!(late, Resumption::Failed(ref e) if e.is_session_expired()));
        assert_eq!(coordinator.refresh_calls(), 1);
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_strand_waiters() {
        let listener = listener_fn(|_| panic!("listener blew up"));
        let (coordinator, _, gate) = coordinator_with(RawResponse::new(400, ""), listener).await;

        let waiting = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_refresh(&request("/a"), 0).await })
        };
        wait_queued(&coordinator, 1).await;
        gate.notify_one();

        assert!(matches!(waiting.await.unwrap(), Resumption::Failed(_)));
        assert_eq!(coordinator.queued(), 0);
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let body = json!({ "success": true, "data": { "access_token": "T2" } });
        let (coordinator, _, gate) = coordinator(RawResponse::json(200, &body)).await;

        let waiting = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_refresh(&request("/a"), 0).await })
        };
        wait_queued(&coordinator, 1).await;

        waiting.abort();
        let _ = waiting.await;
        assert_eq!(coordinator.queued(), 0);
        assert_eq!(coordinator.state(), RefreshState::Refreshing);

        // The shared refresh still completes.
        gate.notify_one();
        while coordinator.state() == RefreshState::Refreshing {
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.generation(), 1);
    }
}
