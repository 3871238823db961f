//! Session Manager
//!
//! Owns the short-lived token (listen key) that authenticated streams
//! depend on. Renewal is single-flight: concurrent `ensure_valid` callers
//! share one issue/extend call. A background timer renews proactively at
//! `ttl - safety_margin` and keeps retrying after a failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};

use crate::domain::{CredentialSource, FetchError, SessionIssuer, SyncError};

use super::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No token was ever requested
    Unauthenticated,
    /// Issue or extend call in flight
    Pending,
    Valid,
    /// Renewal timer fired, token still usable
    Expiring,
    /// Last renewal failed; authenticated topics are void
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub value: String,
    pub issued_at: Instant,
    pub ttl: Duration,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        SessionToken {
            value: value.into(),
            issued_at: Instant::now(),
            ttl,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.ttl
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

type FailureHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

pub struct SessionManager {
    config: SessionConfig,
    issuer: Arc<dyn SessionIssuer>,
    credentials: Arc<dyn CredentialSource>,
    token: ArcSwapOption<SessionToken>,
    state: Mutex<SessionState>,
    /// Serializes issue/extend calls
    renewal: tokio::sync::Mutex<()>,
    handlers: Mutex<Vec<FailureHandler>>,
    /// Wakes the renewal timer when the token changes
    changed: Notify,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        issuer: Arc<dyn SessionIssuer>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        SessionManager {
            config,
            issuer,
            credentials,
            token: ArcSwapOption::empty(),
            state: Mutex::new(SessionState::Unauthenticated),
            renewal: tokio::sync::Mutex::new(()),
            handlers: Mutex::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Current token, if the session is usable
    pub fn current(&self) -> Option<Arc<SessionToken>> {
        let token = self.token.load_full()?;
        let usable = matches!(self.state(), SessionState::Valid | SessionState::Expiring)
            && !token.is_expired(Instant::now());
        usable.then_some(token)
    }

    /// Register a callback run whenever renewal fails or the venue revokes the token
    pub fn on_renewal_failure(&self, handler: impl Fn(&SyncError) + Send + Sync + 'static) {
        self.handlers.lock().push(Arc::new(handler));
    }

    fn fresh(&self) -> Option<Arc<SessionToken>> {
        let token = self.token.load_full()?;
        let fresh = self.state() == SessionState::Valid
            && token.remaining(Instant::now()) > self.config.safety_margin;
        fresh.then_some(token)
    }

    /// Return a token with more than the safety margin left, issuing or
    /// extending one only when needed.
    pub async fn ensure_valid(&self) -> Result<Arc<SessionToken>, SyncError> {
        if let Some(token) = self.fresh() {
            return Ok(token);
        }
        let _guard = self.renewal.lock().await;
        // Another caller may have renewed while we waited
        if let Some(token) = self.fresh() {
            return Ok(token);
        }
        self.renew().await
    }

    /// Extend a live token, otherwise issue a new one. Caller holds `renewal`.
    async fn renew(&self) -> Result<Arc<SessionToken>, SyncError> {
        let live = self
            .token
            .load_full()
            .filter(|t| !t.is_expired(Instant::now()));
        self.set_state(SessionState::Pending);

        let result = match live {
            Some(token) => {
                tracing::debug!("extending session token");
                self.bounded(self.issuer.extend(self.credentials.as_ref(), &token.value))
                    .await
                    .map(|_| token.value.clone())
            }
            None => {
                tracing::debug!("issuing session token");
                self.bounded(self.issuer.issue(self.credentials.as_ref()))
                    .await
            }
        };

        match result {
            Ok(value) => {
                let token = Arc::new(SessionToken::new(value, self.config.ttl));
                self.token.store(Some(Arc::clone(&token)));
                self.set_state(SessionState::Valid);
                self.changed.notify_one();
                tracing::info!(
                    "session valid, renewing in {:?}",
                    self.config.renew_after()
                );
                Ok(token)
            }
            Err(e) => {
                self.invalidate(e.clone());
                Err(e)
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, SyncError> {
        match timeout(self.config.renewal_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SyncError::AuthExpired(e.to_string())),
            Err(_) => Err(SyncError::Timeout(format!(
                "session renewal exceeded {:?}",
                self.config.renewal_timeout
            ))),
        }
    }

    /// Drop the token and notify failure handlers
    pub fn invalidate(&self, reason: SyncError) {
        self.token.store(None);
        self.set_state(SessionState::Invalidated);
        self.changed.notify_one();
        tracing::warn!("session invalidated: {}", reason);

        let handlers: Vec<FailureHandler> = self.handlers.lock().clone();
        for handler in handlers {
            handler(&reason);
        }
    }

    /// Start the renewal timer
    pub fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run_keepalive().await })
    }

    async fn run_keepalive(&self) {
        loop {
            match self.state() {
                SessionState::Unauthenticated => self.changed.notified().await,
                SessionState::Invalidated => {
                    sleep(self.config.retry_interval).await;
                    if self.state() == SessionState::Invalidated
                        && let Err(e) = self.ensure_valid().await
                    {
                        tracing::warn!("session retry failed: {}", e);
                    }
                }
                SessionState::Pending | SessionState::Valid | SessionState::Expiring => {
                    let Some(token) = self.token.load_full() else {
                        self.changed.notified().await;
                        continue;
                    };
                    let renew_at = token.issued_at + self.config.renew_after();
                    tokio::select! {
                        _ = sleep_until(renew_at) => self.renew_scheduled(&token).await,
                        _ = self.changed.notified() => {}
                    }
                }
            }
        }
    }

    async fn renew_scheduled(&self, due: &Arc<SessionToken>) {
        let _guard = self.renewal.lock().await;
        let unchanged = self
            .token
            .load_full()
            .is_some_and(|current| Arc::ptr_eq(&current, due));
        if !unchanged {
            return;
        }
        self.set_state(SessionState::Expiring);
        if let Err(e) = self.renew().await {
            tracing::warn!("scheduled session renewal failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StaticCredentials;

    impl CredentialSource for StaticCredentials {
        fn api_key(&self) -> &str {
            "key"
        }

        fn sign(&self, payload: &str) -> String {
            format!("signed:{}", payload)
        }
    }

    #[derive(Default)]
    struct FakeIssuer {
        issued: AtomicUsize,
        extended: AtomicUsize,
        failing: AtomicBool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SessionIssuer for FakeIssuer {
        async fn issue(&self, _credentials: &dyn CredentialSource) -> Result<String, FetchError> {
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Network("refused".to_string()));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(format!("key-{}", n))
        }

        async fn extend(
            &self,
            _credentials: &dyn CredentialSource,
            _token: &str,
        ) -> Result<(), FetchError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Api {
                    code: -1125,
                    message: "This listenKey does not exist.".to_string(),
                });
            }
            self.extended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new(Duration::from_secs(30 * 60), Duration::from_secs(10 * 60))
            .with_renewal_timeout(Duration::from_secs(5))
            .with_retry_interval(Duration::from_secs(1))
    }

    fn manager(issuer: Arc<FakeIssuer>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(config(), issuer, Arc::new(StaticCredentials)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_valid_is_idempotent() {
        let issuer = Arc::new(FakeIssuer::default());
        let session = manager(issuer.clone());
        assert_eq!(session.state(), SessionState::Unauthenticated);

        let first = session.ensure_valid().await.unwrap();
        let second = session.ensure_valid().await.unwrap();
        assert_eq!(first.value, "key-0");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extends_inside_safety_margin() {
        let issuer = Arc::new(FakeIssuer::default());
        let session = manager(issuer.clone());
        session.ensure_valid().await.unwrap();

        tokio::time::advance(Duration::from_secs(21 * 60)).await;
        let token = session.ensure_valid().await.unwrap();

        assert_eq!(token.value, "key-0");
        assert_eq!(issuer.extended.load(Ordering::SeqCst), 1);
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissues_after_expiry() {
        let issuer = Arc::new(FakeIssuer::default());
        let session = manager(issuer.clone());
        session.ensure_valid().await.unwrap();

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert!(session.current().is_none());
        let token = session.ensure_valid().await.unwrap();

        assert_eq!(token.value, "key-1");
        assert_eq!(issuer.extended.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_invalidates_and_notifies() {
        let issuer = Arc::new(FakeIssuer::default());
        issuer.failing.store(true, Ordering::SeqCst);
        let session = manager(issuer.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_renewal_failure(move |e| sink.lock().push(e.clone()));

        let result = session.ensure_valid().await;
        assert!(matches!(result, Err(SyncError::AuthExpired(_))));
        assert_eq!(session.state(), SessionState::Invalidated);
        assert!(session.current().is_none());
        assert_eq!(seen.lock().len(), 1);

        // Recovers once the venue accepts again
        issuer.failing.store(false, Ordering::SeqCst);
        assert!(session.ensure_valid().await.is_ok());
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timeout() {
        let issuer = Arc::new(FakeIssuer {
            delay: Some(Duration::from_secs(60)),
            ..FakeIssuer::default()
        });
        let session = manager(issuer);

        let result = session.ensure_valid().await;
        assert!(matches!(result, Err(SyncError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_renews_before_expiry() {
        let issuer = Arc::new(FakeIssuer::default());
        let session = manager(issuer.clone());
        let keepalive = session.spawn_keepalive();

        session.ensure_valid().await.unwrap();
        sleep(Duration::from_secs(20 * 60 + 1)).await;

        assert_eq!(issuer.extended.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Valid);
        keepalive.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_retries_after_failure() {
        let issuer = Arc::new(FakeIssuer::default());
        let session = manager(issuer.clone());
        let keepalive = session.spawn_keepalive();

        issuer.failing.store(true, Ordering::SeqCst);
        assert!(session.ensure_valid().await.is_err());

        issuer.failing.store(false, Ordering::SeqCst);
        sleep(Duration::from_secs(2)).await;

        assert_eq!(session.state(), SessionState::Valid);
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
        keepalive.abort();
    }
}
