//! Owned session state for the whole dashboard.
//!
//! The context caches sessions the backend has confirmed, keyed by access
//! token, and follows the backend's auth events between [`SessionContext::init`]
//! and [`SessionContext::teardown`]. Handlers receive it through router state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::token::{decode_claims, now_secs};
use crate::backend::{AuthEvent, Backend};
use crate::models::Session;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Not decided yet (context not initialised, or the backend is unreachable).
    Unknown,
    Absent,
    Present(Session),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub state: SessionState,
    /// The session was re-issued from the refresh token; the caller must hand
    /// the new tokens back to the browser.
    pub refreshed: bool,
}

impl Resolution {
    fn settled(state: SessionState) -> Self {
        Self {
            state,
            refreshed: false,
        }
    }
}

type SessionCache = Arc<RwLock<HashMap<String, Session>>>;

#[derive(Clone)]
pub struct SessionContext {
    backend: Arc<dyn Backend>,
    cache: SessionCache,
    ready: Arc<AtomicBool>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionContext {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(AtomicBool::new(false)),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribes to backend auth events. Must run inside a tokio runtime.
    pub fn init(&self) {
        let mut events = self.backend.subscribe();
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn(session)) => {
                        debug!(user_id = %session.user.id, "session cached from auth event");
                        remember(&cache, session).await;
                    }
                    Ok(AuthEvent::TokenRefreshed(session)) => {
                        debug!(user_id = %session.user.id, "refreshed session cached from auth event");
                        supersede(&cache, session).await;
                    }
                    Ok(AuthEvent::SignedOut { access_token }) => {
                        cache.write().await.remove(&access_token);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session listener lagged behind auth events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        self.ready.store(true, Ordering::SeqCst);
        info!("session context initialised");
    }

    /// Stops following auth events and drops every cached session.
    pub async fn teardown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.cache.write().await.clear();
        info!("session context torn down");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, access_token: &str) -> bool {
        self.cache.read().await.contains_key(access_token)
    }

    pub async fn forget(&self, access_token: &str) {
        self.cache.write().await.remove(access_token);
    }

    /// Decides the session behind the browser's tokens.
    pub async fn resolve(&self, access_token: Option<&str>, refresh_token: Option<&str>) -> Resolution {
        if !self.is_ready() {
            return Resolution::settled(SessionState::Unknown);
        }
        let access_token = access_token.filter(|t| !t.is_empty());
        let refresh_token = refresh_token.filter(|t| !t.is_empty());
        let now = now_secs();

        if let Some(token) = access_token {
            let cached = self.cache.read().await.get(token).cloned();
            match cached {
                Some(session) if !session.is_expired_at(now) => {
                    return Resolution::settled(SessionState::Present(session));
                }
                Some(_) => self.forget(token).await,
                None => {}
            }

            let expires_at = decode_claims(token).and_then(|c| c.exp);
            let expired = expires_at.map(|exp| exp <= now).unwrap_or(false);
            if !expired {
                match self.backend.get_user(token).await {
                    Ok(user) => {
                        let session = Session {
                            user,
                            access_token: token.to_string(),
                            refresh_token: refresh_token.unwrap_or_default().to_string(),
                            expires_at,
                        };
                        remember(&self.cache, session.clone()).await;
                        return Resolution::settled(SessionState::Present(session));
                    }
                    Err(err) if err.is_unauthorized() => {
                        debug!(error = %err, "access token rejected");
                    }
                    Err(err) => {
                        warn!(error = %err, "session check failed");
                        return Resolution::settled(SessionState::Unknown);
                    }
                }
            }
        }

        let Some(refresh_token) = refresh_token else {
            return Resolution::settled(SessionState::Absent);
        };
        match self.backend.refresh_session(refresh_token).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "session refreshed");
                supersede(&self.cache, session.clone()).await;
                Resolution {
                    state: SessionState::Present(session),
                    refreshed: true,
                }
            }
            Err(err) if err.is_transport() => {
                warn!(error = %err, "session refresh unreachable");
                Resolution::settled(SessionState::Unknown)
            }
            Err(err) => {
                debug!(error = %err, "refresh token rejected");
                Resolution::settled(SessionState::Absent)
            }
        }
    }
}

/// Caches a confirmed session and drops entries that have expired.
async fn remember(cache: &SessionCache, session: Session) {
    let now = now_secs();
    let mut cache = cache.write().await;
    cache.retain(|_, cached| !cached.is_expired_at(now));
    cache.insert(session.access_token.clone(), session);
}

/// Caches a refreshed session. The backend revokes the tokens it replaced, so
/// every other entry of the same user goes too.
async fn supersede(cache: &SessionCache, session: Session) {
    let now = now_secs();
    let mut cache = cache.write().await;
    cache.retain(|_, cached| !cached.is_expired_at(now) && cached.user.id != session.user.id);
    cache.insert(session.access_token.clone(), session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Operation};
    use crate::backend::token::{mint_unsigned, TokenClaims};
    use crate::backend::BackendError;

    async fn backend_with_session() -> (Arc<MemoryBackend>, Session) {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("op@example.org", "secret");
        let session = backend.sign_in("op@example.org", "secret").await.unwrap();
        (backend, session)
    }

    fn context(backend: &Arc<MemoryBackend>) -> SessionContext {
        SessionContext::new(backend.clone())
    }

    #[tokio::test]
    async fn unknown_until_initialised() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        let resolution = ctx.resolve(Some(&session.access_token), None).await;
        assert_eq!(resolution.state, SessionState::Unknown);
        assert_eq!(backend.calls(Operation::GetUser), 0);
    }

    #[tokio::test]
    async fn no_tokens_is_absent() {
        let (backend, _) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();
        assert_eq!(ctx.resolve(None, None).await.state, SessionState::Absent);
        assert_eq!(ctx.resolve(Some(""), Some("")).await.state, SessionState::Absent);
    }

    #[tokio::test]
    async fn confirmed_sessions_are_cached() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();

        let first = ctx.resolve(Some(&session.access_token), None).await;
        let second = ctx.resolve(Some(&session.access_token), None).await;
        assert!(matches!(first.state, SessionState::Present(ref s) if s.user == session.user));
        assert_eq!(first.state, second.state);
        assert_eq!(backend.calls(Operation::GetUser), 1);
    }

    #[tokio::test]
    async fn rejected_token_falls_back_to_refresh() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();

        let resolution = ctx
            .resolve(Some("revoked.token.value"), Some(&session.refresh_token))
            .await;
        assert!(resolution.refreshed);
        let SessionState::Present(refreshed) = resolution.state else {
            panic!("expected a refreshed session");
        };
        assert_eq!(refreshed.user, session.user);
        assert_ne!(refreshed.access_token, session.access_token);
    }

    #[tokio::test]
    async fn expired_token_skips_the_user_check() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();

        let stale = mint_unsigned(&TokenClaims {
            sub: session.user.id.clone(),
            email: None,
            exp: Some(now_secs() - 10),
        });
        let resolution = ctx.resolve(Some(&stale), Some(&session.refresh_token)).await;
        assert!(resolution.refreshed);
        assert_eq!(backend.calls(Operation::GetUser), 0);
    }

    #[tokio::test]
    async fn rejected_token_without_refresh_is_absent() {
        let (backend, _) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();
        let resolution = ctx.resolve(Some("garbage"), None).await;
        assert_eq!(resolution.state, SessionState::Absent);
    }

    #[tokio::test]
    async fn unreachable_backend_leaves_state_unknown() {
        let (backend, session) = backend_with_session().await;
        backend.fail_next(
            Operation::GetUser,
            1,
            BackendError::Transport("connection refused".into()),
        );
        let ctx = context(&backend);
        ctx.init();
        let resolution = ctx.resolve(Some(&session.access_token), None).await;
        assert_eq!(resolution.state, SessionState::Unknown);
    }

    #[tokio::test]
    async fn sign_in_events_populate_the_cache() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("op@example.org", "secret");
        let ctx = context(&backend);
        ctx.init();

        let session = backend.sign_in("op@example.org", "secret").await.unwrap();
        for _ in 0..100 {
            if ctx.contains(&session.access_token).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(ctx.contains(&session.access_token).await);

        backend.sign_out(&session.access_token).await.unwrap();
        for _ in 0..100 {
            if !ctx.contains(&session.access_token).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!ctx.contains(&session.access_token).await);
    }

    #[tokio::test]
    async fn teardown_returns_to_unknown() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();
        ctx.resolve(Some(&session.access_token), None).await;
        ctx.teardown().await;

        assert!(!ctx.is_ready());
        assert!(!ctx.contains(&session.access_token).await);
        let resolution = ctx.resolve(Some(&session.access_token), None).await;
        assert_eq!(resolution.state, SessionState::Unknown);
    }

    async fn wait_until_cached(ctx: &SessionContext, token: &str) {
        for _ in 0..100 {
            if ctx.contains(token).await {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn refresh_events_drop_superseded_tokens() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();
        ctx.resolve(Some(&session.access_token), None).await;
        assert!(ctx.contains(&session.access_token).await);

        let mut tokens = vec![session.access_token.clone()];
        let mut refresh = session.refresh_token.clone();
        for _ in 0..5 {
            let next = backend.refresh_session(&refresh).await.unwrap();
            wait_until_cached(&ctx, &next.access_token).await;
            refresh = next.refresh_token;
            tokens.push(next.access_token);
        }

        let (latest, superseded) = tokens.split_last().unwrap();
        assert!(ctx.contains(latest).await);
        for token in superseded {
            assert!(!ctx.contains(token).await);
        }

        let get_user_calls = backend.calls(Operation::GetUser);
        let resolution = ctx.resolve(Some(&session.access_token), None).await;
        assert_eq!(resolution.state, SessionState::Absent);
        assert_eq!(backend.calls(Operation::GetUser), get_user_calls + 1);
    }

    #[tokio::test]
    async fn refresh_through_resolve_drops_the_cached_token() {
        let (backend, session) = backend_with_session().await;
        let ctx = context(&backend);
        ctx.init();
        ctx.resolve(Some(&session.access_token), None).await;

        let resolution = ctx
            .resolve(Some("revoked.token.value"), Some(&session.refresh_token))
            .await;
        assert!(resolution.refreshed);
        assert!(!ctx.contains(&session.access_token).await);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_insert() {
        let cache: SessionCache = Arc::new(RwLock::new(HashMap::new()));
        let user = |id: &str| crate::models::AuthUser {
            id: id.to_string(),
            email: None,
        };
        let stale = Session {
            user: user("a"),
            access_token: "stale".into(),
            refresh_token: String::new(),
            expires_at: Some(now_secs() - 1),
        };
        let other = Session {
            user: user("b"),
            access_token: "other".into(),
            refresh_token: String::new(),
            expires_at: None,
        };
        remember(&cache, stale).await;
        remember(&cache, other.clone()).await;

        let cache = cache.read().await;
        assert!(!cache.contains_key("stale"));
        assert_eq!(cache.get("other"), Some(&other));
    }
}
