//! Authorization-code grant with PKCE (RFC 6749 §4.1, RFC 7636)
//!
//! Each call to [`AuthorizationCodeProvider::acquire_token`] opens a pending
//! flow keyed by a fresh `state`, emits the authorization URL to the operator
//! and suspends until one of these settles it:
//!
//! - the callback route calls [`AuthorizationCodeProvider::complete_oauth_flow`]
//!   (or [`AuthorizationCodeProvider::abort_oauth_flow`] on an error redirect)
//! - the per-flow deadline elapses
//! - the stale-state sweep expires it
//! - [`AuthorizationCodeProvider::destroy`] tears the provider down
//!
//! Removing the flow from the instance-local map is the claim to settle it.
//! The route in the [`FlowRegistry`] is removed under the same lock, so both
//! entries appear and disappear together and every later arrival for that
//! state sees [`Error::InvalidState`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::exchange::{ClientIdentity, TokenEndpoint, TokenGrant};
use super::pkce;
use super::prompt::{AuthorizationRequest, ConsolePrompt, OperatorPrompt};
use super::provider::{AuthProvider, RefreshPolicy, TokenLifecycle};
use super::registry::FlowRegistry;
use super::storage::{MemoryTokenStorage, TokenStorage};
use crate::config::{AuthorizationCodeConfig, parse_endpoint};
use crate::{Error, Result};

/// A flow waiting for its callback
struct PendingAuthorization {
    /// PKCE secret, sent only at token exchange
    code_verifier: String,
    /// Resolves the suspended `acquire_token` call
    settle: oneshot::Sender<Result<()>>,
    created_at: Instant,
}

impl PendingAuthorization {
    fn settle(self, outcome: Result<()>) {
        // the waiter may have been cancelled; nothing to deliver then
        let _ = self.settle.send(outcome);
    }
}

/// Protocol timers, copied from config
#[derive(Debug, Clone, Copy)]
struct FlowTimers {
    authorization_timeout: Duration,
    stale_state_threshold: Duration,
    sweep_interval: Duration,
    countdown_interval: Duration,
}

/// Interactive authorization-code provider
pub struct AuthorizationCodeProvider {
    this: Weak<Self>,
    lifecycle: TokenLifecycle,
    endpoint: TokenEndpoint,
    authorization_endpoint: Url,
    redirect_uri: String,
    scope: Option<String>,
    timers: FlowTimers,
    serialize_flows: bool,
    registry: Arc<FlowRegistry>,
    prompt: Arc<dyn OperatorPrompt>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    flow_gate: tokio::sync::Mutex<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

/// Removes a flow's entries when `acquire_token` returns or is dropped.
/// A no-op once the flow has been claimed by a settlement path.
struct FlowCleanup<'a> {
    provider: &'a AuthorizationCodeProvider,
    state: &'a str,
}

impl Drop for FlowCleanup<'_> {
    fn drop(&mut self) {
        if self.provider.take_flow(self.state).is_some() {
            debug!(provider = %self.provider.name(), state = state_tag(self.state), "Abandoned pending authorization");
        }
    }
}

/// Leading characters of a state, enough to correlate log lines
fn state_tag(state: &str) -> &str {
    state.get(..8).unwrap_or(state)
}

impl AuthorizationCodeProvider {
    /// Create a provider with in-memory storage, a console prompt and its
    /// own HTTP client
    pub fn new(
        name: impl Into<String>,
        config: &AuthorizationCodeConfig,
        registry: Arc<FlowRegistry>,
    ) -> Result<Arc<Self>> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Self::with_parts(
            name,
            config,
            registry,
            http,
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(ConsolePrompt),
        )
    }

    /// Create a provider with explicit collaborators
    pub fn with_parts(
        name: impl Into<String>,
        config: &AuthorizationCodeConfig,
        registry: Arc<FlowRegistry>,
        http: Client,
        storage: Arc<dyn TokenStorage>,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let authorization_endpoint =
            parse_endpoint("authorization_endpoint", &config.authorization_endpoint)?;
        let token_url = parse_endpoint("token_endpoint", &config.token_endpoint)?;
        let redirect_uri = parse_endpoint("redirect_uri", &config.redirect_uri)?;

        let endpoint = TokenEndpoint::new(
            http,
            token_url,
            ClientIdentity {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                auth_method: config.client_auth,
            },
            config.default_token_lifetime,
        );

        let name = name.into();
        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            // refreshing usually needs the user again, so never refresh early
            lifecycle: TokenLifecycle::new(name, storage, RefreshPolicy::Disabled),
            endpoint,
            authorization_endpoint,
            redirect_uri: redirect_uri.to_string(),
            scope: config.scope.clone(),
            timers: FlowTimers {
                authorization_timeout: config.authorization_timeout,
                stale_state_threshold: config.stale_state_threshold,
                sweep_interval: config.sweep_interval,
                countdown_interval: config.countdown_interval,
            },
            serialize_flows: config.serialize_flows,
            registry,
            prompt,
            pending: Mutex::new(HashMap::new()),
            flow_gate: tokio::sync::Mutex::new(()),
            sweeper: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Registry this provider routes its states through
    #[must_use]
    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    /// Token storage
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn TokenStorage> {
        self.lifecycle.storage()
    }

    /// Number of flows awaiting settlement on this instance
    #[must_use]
    pub fn pending_flow_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether `state` is pending on this instance
    #[must_use]
    pub fn has_pending_flow(&self, state: &str) -> bool {
        self.pending.lock().contains_key(state)
    }

    /// Whether [`AuthorizationCodeProvider::destroy`] has run
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Authorization URL for a flow
    fn authorization_url(&self, state: &str, code_challenge: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.endpoint.client().client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            params.append_pair("state", state);
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("code_challenge_method", pkce::CODE_CHALLENGE_METHOD);
            if let Some(ref scope) = self.scope {
                params.append_pair("scope", scope);
            }
        }
        url.to_string()
    }

    /// Insert a flow into both maps without an intervening await
    fn register_flow(&self, state: &str, flow: PendingAuthorization) -> Result<()> {
        let mut pending = self.pending.lock();
        if self.is_destroyed() {
            return Err(Error::ProviderDestroyed(self.name().to_string()));
        }
        if !self.registry.register(state, self.this.clone()) {
            return Err(Error::Internal("Generated authorization state collided".to_string()));
        }
        pending.insert(state.to_string(), flow);
        Ok(())
    }

    /// Claim a flow: remove it from both maps. Only the claimant settles.
    fn take_flow(&self, state: &str) -> Option<PendingAuthorization> {
        let mut pending = self.pending.lock();
        let flow = pending.remove(state)?;
        if !self.registry.unregister(state) {
            warn!(provider = %self.name(), state = state_tag(state), "Flow route was already missing from registry");
        }
        Some(flow)
    }

    /// Start the stale-state sweep on first use
    fn ensure_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.is_destroyed() {
            return;
        }

        let provider = self.this.clone();
        let period = self.timers.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(provider) = provider.upgrade() else {
                    break;
                };
                let swept = provider.sweep_stale_flows();
                if swept > 0 {
                    debug!(provider = %provider.name(), swept, "Stale-state sweep expired flows");
                }
            }
        }));
    }

    /// Start an interactive flow and wait for it to settle.
    ///
    /// On success the token is in storage. Each call uses a fresh state; on
    /// timeout the caller must call again to retry.
    #[instrument(skip(self), fields(provider = %self.name()))]
    pub async fn acquire_token(&self) -> Result<()> {
        let _gate = if self.serialize_flows {
            let (guard, waited) = match self.flow_gate.try_lock() {
                Ok(guard) => (guard, false),
                Err(_) => (self.flow_gate.lock().await, true),
            };
            if waited && self.lifecycle.is_valid() {
                debug!("Concurrent flow already stored a token");
                return Ok(());
            }
            Some(guard)
        } else {
            None
        };

        self.ensure_sweeper();

        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let url = self.authorization_url(&state, &pkce::generate_code_challenge(&code_verifier));

        let (tx, rx) = oneshot::channel();
        self.register_flow(
            &state,
            PendingAuthorization {
                code_verifier,
                settle: tx,
                created_at: Instant::now(),
            },
        )?;
        let _cleanup = FlowCleanup {
            provider: self,
            state: &state,
        };

        let request = AuthorizationRequest {
            provider: self.name().to_string(),
            state: state.clone(),
            url,
            timeout: self.timers.authorization_timeout,
        };
        info!(state = state_tag(&state), timeout = ?request.timeout, "Waiting for authorization callback");
        self.prompt.authorization_required(&request);

        self.await_settlement(&request, rx).await
    }

    async fn await_settlement(
        &self,
        request: &AuthorizationRequest,
        mut rx: oneshot::Receiver<Result<()>>,
    ) -> Result<()> {
        let deadline = Instant::now() + request.timeout;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let period = self.timers.countdown_interval;
        let mut countdown = tokio::time::interval_at(Instant::now() + period, period);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                outcome = &mut rx => return flatten(outcome),
                () = &mut sleep => break,
                _ = countdown.tick() => {
                    self.prompt.waiting(request, deadline.saturating_duration_since(Instant::now()));
                }
            }
        }

        if self.take_flow(&request.state).is_some() {
            warn!(state = state_tag(&request.state), "Authorization timed out");
            return Err(Error::AuthorizationTimeout {
                state: request.state.clone(),
                timeout: request.timeout,
            });
        }

        // a callback claimed the flow before the deadline and is still
        // exchanging the code; its outcome wins
        flatten(rx.await)
    }

    /// Finish a flow with the code delivered to the redirect URI.
    ///
    /// Unknown or already-settled states fail with [`Error::InvalidState`]
    /// and change nothing. Otherwise the flow is removed from both maps
    /// before the exchange starts, and its suspended caller receives the
    /// same outcome this call returns.
    #[instrument(skip(self, state, code), fields(provider = %self.name(), state = state_tag(state)))]
    pub async fn complete_oauth_flow(&self, state: &str, code: &str) -> Result<()> {
        let flow = self
            .take_flow(state)
            .ok_or_else(|| Error::InvalidState(state_tag(state).to_string()))?;

        let grant = TokenGrant::AuthorizationCode {
            code,
            redirect_uri: &self.redirect_uri,
            code_verifier: &flow.code_verifier,
        };

        let exchanged = self.endpoint.exchange(&grant).await;

        match exchanged {
            Ok(token) => {
                info!(expires_at = %token.expires_at, "Authorization completed");
                self.lifecycle.storage().store(token);
                flow.settle(Ok(()));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Authorization code exchange failed");
                flow.settle(Err(Error::TokenExchange(e.clone())));
                Err(Error::TokenExchange(e))
            }
        }
    }

    /// Settle a flow whose redirect carried an OAuth `error`
    pub fn abort_oauth_flow(&self, state: &str, error: &str, description: Option<&str>) -> Result<()> {
        let flow = self
            .take_flow(state)
            .ok_or_else(|| Error::InvalidState(state_tag(state).to_string()))?;
        warn!(provider = %self.name(), state = state_tag(state), error, "Authorization denied");
        flow.settle(Err(Error::AuthorizationDenied {
            error: error.to_string(),
            description: description.unwrap_or("no description provided").to_string(),
        }));
        Ok(())
    }

    /// Expire flows older than the stale-state threshold. Returns how many
    /// were settled.
    pub fn sweep_stale_flows(&self) -> usize {
        self.sweep_stale_flows_at(Instant::now())
    }

    fn sweep_stale_flows_at(&self, now: Instant) -> usize {
        let threshold = self.timers.stale_state_threshold;
        let expired: Vec<(String, PendingAuthorization)> = {
            let mut pending = self.pending.lock();
            let stale: Vec<String> = pending
                .iter()
                .filter(|(_, flow)| now.saturating_duration_since(flow.created_at) >= threshold)
                .map(|(state, _)| state.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|state| {
                    let flow = pending.remove(&state)?;
                    if !self.registry.unregister(&state) {
                        warn!(provider = %self.name(), state = state_tag(&state), "Stale flow route was already missing");
                    }
                    Some((state, flow))
                })
                .collect()
        };

        let count = expired.len();
        for (state, flow) in expired {
            warn!(provider = %self.name(), state = state_tag(&state), "Expiring stale authorization");
            flow.settle(Err(Error::AuthorizationTimeout {
                state,
                timeout: threshold,
            }));
        }
        count
    }

    /// Tear the provider down: stop the sweep, fail every pending flow with
    /// [`Error::ProviderDestroyed`], drop their routes and clear the token.
    /// Idempotent.
    pub fn destroy(&self) {
        let drained: Vec<PendingAuthorization> = {
            let mut pending = self.pending.lock();
            self.destroyed.store(true, Ordering::Release);
            pending
                .drain()
                .map(|(state, flow)| {
                    if !self.registry.unregister(&state) {
                        warn!(provider = %self.name(), state = state_tag(&state), "Flow route was already missing from registry");
                    }
                    flow
                })
                .collect()
        };

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        if !drained.is_empty() {
            info!(provider = %self.name(), flows = drained.len(), "Cancelling pending authorizations");
        }
        for flow in drained {
            flow.settle(Err(Error::ProviderDestroyed(self.name().to_string())));
        }

        self.lifecycle.storage().clear();
    }

    /// Redeem a refresh token, keeping the old refresh token if the server
    /// does not rotate it
    async fn refresh_with_token(&self, refresh_token: &str) -> Result<()> {
        let grant = TokenGrant::RefreshToken {
            refresh_token,
            scope: self.scope.as_deref(),
        };
        let mut token = self.endpoint.exchange(&grant).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        info!(provider = %self.name(), "Token refreshed");
        self.lifecycle.storage().store(token);
        Ok(())
    }

    /// Refresh grant when a refresh token is stored, interactive flow otherwise
    async fn reacquire(&self) -> Result<()> {
        let refresh_token = self
            .lifecycle
            .storage()
            .retrieve()
            .and_then(|t| t.refresh_token);

        if let Some(refresh_token) = refresh_token {
            match self.refresh_with_token(&refresh_token).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(provider = %self.name(), error = %e, "Refresh failed, falling back to interactive authorization");
                }
            }
        }

        self.acquire_token().await
    }
}

fn flatten(outcome: std::result::Result<Result<()>, oneshot::error::RecvError>) -> Result<()> {
    outcome.unwrap_or_else(|_| {
        Err(Error::Internal(
            "Authorization flow was dropped before it settled".to_string(),
        ))
    })
}

impl Drop for AuthorizationCodeProvider {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.destroy();
        }
    }
}

#[async_trait]
impl AuthProvider for AuthorizationCodeProvider {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    async fn get_headers(&self) -> Result<HashMap<String, String>> {
        self.lifecycle.headers(|| self.reacquire()).await
    }

    fn is_valid(&self) -> bool {
        self.lifecycle.is_valid()
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self) -> Result<()> {
        self.reacquire().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    struct RecordingPrompt(mpsc::UnboundedSender<AuthorizationRequest>);

    impl OperatorPrompt for RecordingPrompt {
        fn authorization_required(&self, request: &AuthorizationRequest) {
            let _ = self.0.send(request.clone());
        }
    }

    fn config(timeout: Duration) -> AuthorizationCodeConfig {
        let mut config = AuthorizationCodeConfig::new(
            "client",
            "https://auth.example.com/authorize",
            // closed loopback port: exchanges fail fast
            "http://127.0.0.1:9/token",
            "http://127.0.0.1:8765/oauth/callback",
        );
        config.authorization_timeout = timeout;
        config.stale_state_threshold = timeout * 2;
        config.scope = Some("read write".to_string());
        config
    }

    fn provider(
        registry: &Arc<FlowRegistry>,
        timeout: Duration,
    ) -> (Arc<AuthorizationCodeProvider>, mpsc::UnboundedReceiver<AuthorizationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = AuthorizationCodeProvider::with_parts(
            "test",
            &config(timeout),
            Arc::clone(registry),
            Client::new(),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(RecordingPrompt(tx)),
        )
        .unwrap();
        (provider, rx)
    }

    fn spawn_acquire(provider: &Arc<AuthorizationCodeProvider>) -> JoinHandle<Result<()>> {
        let provider = Arc::clone(provider);
        tokio::spawn(async move { provider.acquire_token().await })
    }

    #[test]
    fn invalid_config_fails_construction() {
        let registry = Arc::new(FlowRegistry::new());
        let mut bad = config(Duration::from_secs(1));
        bad.authorization_endpoint = "not a url".to_string();
        let err = AuthorizationCodeProvider::new("test", &bad, registry).err().unwrap();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[tokio::test]
    async fn authorization_url_carries_pkce_and_state() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);

        let request = prompts.recv().await.unwrap();
        let url = Url::parse(&request.url).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8765/oauth/callback");
        assert_eq!(params["state"], request.state);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["code_challenge"].len(), 43);
        assert_eq!(params["scope"], "read write");

        provider.destroy();
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn entries_exist_before_url_is_emitted() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);

        let request = prompts.recv().await.unwrap();
        assert!(provider.has_pending_flow(&request.state));
        let routed = registry.provider_for_state(&request.state).unwrap();
        assert!(Arc::ptr_eq(&routed, &provider));

        provider.destroy();
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_settles_once_and_cleans_up() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_millis(100));
        let task = spawn_acquire(&provider);

        let request = prompts.recv().await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::AuthorizationTimeout { ref state, .. } if *state == request.state), "{err}");

        assert_eq!(provider.pending_flow_count(), 0);
        assert!(registry.is_empty());
        // nothing left for the sweep to settle
        assert_eq!(provider.sweep_stale_flows_at(Instant::now() + Duration::from_secs(3600)), 0);
    }

    #[tokio::test]
    async fn sweep_expires_stale_flow_exactly_once() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);
        let request = prompts.recv().await.unwrap();

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(provider.sweep_stale_flows_at(later), 1);
        assert_eq!(provider.sweep_stale_flows_at(later), 0);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::AuthorizationTimeout { .. }), "{err}");
        assert!(!registry.contains(&request.state));
        assert_eq!(provider.pending_flow_count(), 0);
    }

    #[tokio::test]
    async fn sweep_leaves_young_flows_alone() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);
        let _ = prompts.recv().await.unwrap();

        assert_eq!(provider.sweep_stale_flows(), 0);
        assert_eq!(provider.pending_flow_count(), 1);

        provider.destroy();
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn background_sweep_expires_orphaned_flow() {
        let registry = Arc::new(FlowRegistry::new());
        let mut cfg = config(Duration::from_millis(50));
        cfg.stale_state_threshold = Duration::from_millis(100);
        cfg.sweep_interval = Duration::from_millis(30);
        let provider = AuthorizationCodeProvider::with_parts(
            "test",
            &cfg,
            Arc::clone(&registry),
            Client::new(),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(RecordingPrompt(mpsc::unbounded_channel().0)),
        )
        .unwrap();

        // a flow whose caller never waits on it
        let (tx, rx) = oneshot::channel();
        provider
            .register_flow(
                "orphan-state",
                PendingAuthorization {
                    code_verifier: pkce::generate_code_verifier(),
                    settle: tx,
                    created_at: Instant::now(),
                },
            )
            .unwrap();
        provider.ensure_sweeper();
        provider.ensure_sweeper();
        assert!(provider.sweeper.lock().is_some());

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("sweep did not run")
            .unwrap();
        assert!(matches!(outcome, Err(Error::AuthorizationTimeout { .. })));
        assert!(registry.is_empty());
        assert_eq!(provider.pending_flow_count(), 0);

        provider.destroy();
        assert!(provider.sweeper.lock().is_none());

        // a destroyed provider never restarts its sweep
        provider.ensure_sweeper();
        assert!(provider.sweeper.lock().is_none());
    }

    #[tokio::test]
    async fn unknown_state_is_invalid_and_changes_nothing() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);
        let _ = prompts.recv().await.unwrap();

        let (local_before, routes_before) = (provider.pending_flow_count(), registry.len());
        let err = provider.complete_oauth_flow("unknown-state", "code").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)), "{err}");
        assert_eq!(provider.pending_flow_count(), local_before);
        assert_eq!(registry.len(), routes_before);

        provider.destroy();
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_exchange_settles_waiter_and_removes_entries() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);
        let request = prompts.recv().await.unwrap();

        let err = provider.complete_oauth_flow(&request.state, "code").await.unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "{err}");

        let waiter = task.await.unwrap().unwrap_err();
        assert!(matches!(waiter, Error::TokenExchange(_)), "{waiter}");
        assert_eq!(provider.pending_flow_count(), 0);
        assert!(registry.is_empty());
        assert!(provider.storage().retrieve().is_none());

        // second delivery of the same state is not a second settlement
        let again = provider.complete_oauth_flow(&request.state, "code").await.unwrap_err();
        assert!(matches!(again, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn error_redirect_settles_as_denied() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);
        let request = prompts.recv().await.unwrap();

        provider
            .abort_oauth_flow(&request.state, "access_denied", Some("user said no"))
            .unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::AuthorizationDenied { ref error, .. } if error == "access_denied"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn destroy_rejects_pending_and_later_callbacks() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let first = spawn_acquire(&provider);
        let second = spawn_acquire(&provider);
        let a = prompts.recv().await.unwrap();
        let b = prompts.recv().await.unwrap();
        assert_ne!(a.state, b.state);
        assert_eq!(provider.pending_flow_count(), 2);

        provider.destroy();

        for task in [first, second] {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::ProviderDestroyed(_)), "{err}");
        }
        assert!(registry.is_empty());
        for state in [&a.state, &b.state] {
            let err = provider.complete_oauth_flow(state, "code").await.unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
        }

        let err = provider.acquire_token().await.unwrap_err();
        assert!(matches!(err, Error::ProviderDestroyed(_)));
    }

    #[tokio::test]
    async fn dropping_the_caller_removes_entries() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, mut prompts) = provider(&registry, Duration::from_secs(30));
        let task = spawn_acquire(&provider);
        let request = prompts.recv().await.unwrap();

        task.abort();
        let _ = task.await;

        assert!(!provider.has_pending_flow(&request.state));
        assert!(!registry.contains(&request.state));
    }

    #[tokio::test]
    async fn dropping_the_provider_unroutes_its_states() {
        let registry = Arc::new(FlowRegistry::new());
        let (provider, _prompts) = provider(&registry, Duration::from_secs(30));
        let flow = PendingAuthorization {
            code_verifier: pkce::generate_code_verifier(),
            settle: oneshot::channel().0,
            created_at: Instant::now(),
        };
        provider.register_flow("s1", flow).unwrap();
        assert!(registry.contains("s1"));

        drop(provider);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn serialized_flows_do_not_overlap() {
        let registry = Arc::new(FlowRegistry::new());
        let (tx, mut prompts) = mpsc::unbounded_channel();
        let mut cfg = config(Duration::from_millis(200));
        cfg.serialize_flows = true;
        let provider = AuthorizationCodeProvider::with_parts(
            "serial",
            &cfg,
            Arc::clone(&registry),
            Client::new(),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(RecordingPrompt(tx)),
        )
        .unwrap();

        let first = spawn_acquire(&provider);
        let second = spawn_acquire(&provider);

        let _ = prompts.recv().await.unwrap();
        assert_eq!(provider.pending_flow_count(), 1);

        // first times out, then the second starts its own flow
        let _ = prompts.recv().await.unwrap();
        assert_eq!(provider.pending_flow_count(), 1);

        for task in [first, second] {
            assert!(matches!(task.await.unwrap(), Err(Error::AuthorizationTimeout { .. })));
        }
    }
}
