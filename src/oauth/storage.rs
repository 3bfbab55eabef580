//! OAuth Token Storage
//!
//! Holds the most recent token of a single provider instance. The reference
//! implementation is volatile; durable backends implement [`TokenStorage`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Access token plus the metadata needed to decide when to replace it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Absolute expiry. Always set; a default lifetime applies when the
    /// server omits `expires_in`.
    pub expires_at: DateTime<Utc>,

    /// Refresh token (optional)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenData {
    /// Create a token expiring `lifetime` from now
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: expiry_from_now(lifetime),
            refresh_token: None,
            scope: None,
        }
    }

    /// True iff `now` is at or after `expires_at`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check expiry against the wall clock
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time until expiration, `None` once expired
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc`
    #[must_use]
    pub fn authorization_value(&self) -> String {
        // RFC 6750 scheme is case-insensitive; servers commonly send "bearer"
        let scheme = if self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{scheme} {}", self.access_token)
    }
}

/// Absolute timestamp `lifetime` from now, saturating on overflow
pub(crate) fn expiry_from_now(lifetime: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Storage contract for a provider's current token.
///
/// Synchronous and side-effect free beyond its own state. Implementations
/// must give read-your-write consistency within a process.
pub trait TokenStorage: Send + Sync {
    /// Current token, if any
    fn retrieve(&self) -> Option<TokenData>;

    /// Replace the current token
    fn store(&self, token: TokenData);

    /// True when no token is stored or the stored one has expired
    fn is_expired(&self) -> bool {
        self.retrieve().is_none_or(|t| t.is_expired())
    }

    /// Drop the current token
    fn clear(&self);
}

/// In-process, volatile token storage
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: RwLock<Option<TokenData>>,
}

impl MemoryTokenStorage {
    /// Create empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn retrieve(&self) -> Option<TokenData> {
        self.token.read().clone()
    }

    fn store(&self, token: TokenData) {
        debug!(expires_at = %token.expires_at, "Storing OAuth token");
        *self.token.write() = Some(token);
    }

    fn clear(&self) {
        self.token.write().take();
    }
}
