//! The redirect/notification sink.
//!
//! When a session can no longer be recovered the client tells the hosting
//! application through a [`SessionListener`], which usually navigates to a
//! login screen and shows a "session expired" notice.

use std::sync::Arc;

/// Receives user-facing session failures.
pub trait SessionListener: Send + Sync {
    /// The session ended; the user should sign in again.
    ///
    /// `return_path` is the path (and query) of the request that was in
    /// flight, so the application can send the user back after login.
    /// Called at most once per failed refresh episode.
    fn on_session_expired(&self, return_path: &str);
}

/// Ignores all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionListener;

impl SessionListener for NoopSessionListener {
    fn on_session_expired(&self, _return_path: &str) {}
}

/// Logs notifications and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSessionListener;

impl SessionListener for LogSessionListener {
    fn on_session_expired(&self, return_path: &str) {
        tracing::warn!(return_path, "session expired, sign-in required");
    }
}

/// Adapts a closure into a [`SessionListener`].
pub struct FnSessionListener<F>(F);

impl<F> FnSessionListener<F>
where
    F: Fn(&str) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SessionListener for FnSessionListener<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn on_session_expired(&self, return_path: &str) {
        (self.0)(return_path)
    }
}

/// Shorthand for `Arc::new(FnSessionListener::new(f))`.
pub fn listener_fn<F>(f: F) -> Arc<dyn SessionListener>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(FnSessionListener::new(f))
}
