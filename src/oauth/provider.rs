//! Auth provider contract and shared token lifecycle
//!
//! Every grant implements [`AuthProvider`]. The token bookkeeping common to
//! all grants (ensure-valid-token, proactive refresh window, header
//! rendering) lives in [`TokenLifecycle`], which each grant embeds.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::storage::{TokenData, TokenStorage};
use crate::{Error, Result};

/// Capability every grant type exposes to the gateway
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Provider name (downstream server it authenticates)
    fn name(&self) -> &str;

    /// Headers for an outbound request, acquiring a token if necessary.
    /// May suspend for as long as acquisition takes.
    async fn get_headers(&self) -> Result<HashMap<String, String>>;

    /// Best-effort, non-suspending validity check against storage
    fn is_valid(&self) -> bool;

    /// Whether [`AuthProvider::refresh`] is meaningful for this grant
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Replace the current token
    async fn refresh(&self) -> Result<()> {
        Err(Error::Internal(format!(
            "Provider '{}' does not support refresh",
            self.name()
        )))
    }
}

/// When a still-valid token is replaced ahead of expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Only replace expired tokens
    Disabled,
    /// Replace tokens expiring within this window
    BeforeExpiry(Duration),
}

impl RefreshPolicy {
    /// Policy from a configured window; zero disables
    #[must_use]
    pub fn from_window(window: Duration) -> Self {
        if window.is_zero() {
            Self::Disabled
        } else {
            Self::BeforeExpiry(window)
        }
    }
}

/// Token lifecycle shared by all grants
pub struct TokenLifecycle {
    name: String,
    storage: Arc<dyn TokenStorage>,
    refresh_policy: RefreshPolicy,
}

impl TokenLifecycle {
    /// Create a lifecycle over a provider's storage
    pub fn new(name: impl Into<String>, storage: Arc<dyn TokenStorage>, refresh_policy: RefreshPolicy) -> Self {
        Self {
            name: name.into(),
            storage,
            refresh_policy,
        }
    }

    /// Provider name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token storage
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn TokenStorage> {
        &self.storage
    }

    /// Stored token is present and not expired
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.storage.is_expired()
    }

    /// Token is valid but inside the proactive refresh window
    #[must_use]
    pub fn is_refresh_due(&self, token: &TokenData) -> bool {
        match self.refresh_policy {
            RefreshPolicy::Disabled => false,
            RefreshPolicy::BeforeExpiry(window) => {
                let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
                Utc::now()
                    .checked_add_signed(window)
                    .is_none_or(|horizon| token.is_expired_at(horizon))
            }
        }
    }

    /// Return the stored token if usable, otherwise run `acquire` and read
    /// storage back.
    ///
    /// A token inside the proactive window is still returned if `acquire`
    /// fails, since it has not actually expired.
    pub async fn ensure_valid_token<F, Fut>(&self, acquire: F) -> Result<TokenData>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let stale = match self.storage.retrieve() {
            Some(token) if !token.is_expired() => {
                if !self.is_refresh_due(&token) {
                    return Ok(token);
                }
                debug!(provider = %self.name, "Token inside refresh window, refreshing proactively");
                Some(token)
            }
            _ => None,
        };

        if let Err(e) = acquire().await {
            return match stale {
                Some(token) if !token.is_expired() => {
                    warn!(provider = %self.name, error = %e, "Proactive refresh failed, using current token");
                    Ok(token)
                }
                _ => Err(e),
            };
        }

        self.storage
            .retrieve()
            .filter(|t| !t.is_expired())
            .ok_or_else(|| {
                Error::StorageInconsistency(format!(
                    "provider '{}' acquired a token but storage holds no valid token",
                    self.name
                ))
            })
    }

    /// `get_headers` in terms of [`TokenLifecycle::ensure_valid_token`]
    pub async fn headers<F, Fut>(&self, acquire: F) -> Result<HashMap<String, String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let token = self.ensure_valid_token(acquire).await?;
        Ok(bearer_headers(&token))
    }
}

/// Render the request headers for a token
#[must_use]
pub fn bearer_headers(token: &TokenData) -> HashMap<String, String> {
    HashMap::from([("Authorization".to_string(), token.authorization_value())])
}
