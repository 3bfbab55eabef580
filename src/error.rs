//! Error types for the OAuth provider framework

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the OAuth provider framework
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth provider errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing field, malformed URL, bad timer)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown, expired or already-settled authorization state
    #[error("Invalid or expired authorization state: {0}")]
    InvalidState(String),

    /// No callback arrived before the flow's deadline
    #[error("Authorization timed out after {timeout:?} (state {state})")]
    AuthorizationTimeout {
        /// State of the abandoned flow
        state: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// The authorization server redirected back with an `error` parameter
    #[error("Authorization denied: {error} - {description}")]
    AuthorizationDenied {
        /// OAuth error code (e.g. `access_denied`)
        error: String,
        /// Human readable description
        description: String,
    },

    /// Token endpoint rejected the request or returned an unusable body
    #[error("Token exchange failed: {0}")]
    TokenExchange(TokenExchangeError),

    /// Acquisition reported success but storage holds no token
    #[error("Token storage inconsistency: {0}")]
    StorageInconsistency(String),

    /// Provider was torn down while the flow was pending
    #[error("Provider destroyed: {0}")]
    ProviderDestroyed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable name of the error kind, used in logs and
    /// callback responses
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration_error",
            Self::InvalidState(_) => "invalid_state",
            Self::AuthorizationTimeout { .. } => "authorization_timeout",
            Self::AuthorizationDenied { .. } => "authorization_denied",
            Self::TokenExchange(_) => "token_exchange_error",
            Self::StorageInconsistency(_) => "storage_inconsistency",
            Self::ProviderDestroyed(_) => "provider_destroyed",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether starting a fresh attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationTimeout { .. } | Self::TokenExchange(_) | Self::InvalidState(_)
        )
    }
}

impl From<TokenExchangeError> for Error {
    fn from(err: TokenExchangeError) -> Self {
        Self::TokenExchange(err)
    }
}

/// Normalized token endpoint failure.
///
/// Cloneable so one failure can be reported both to the suspended caller and
/// to whoever delivered the authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeError {
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,
    /// RFC 6749 §5.2 `error` code, when the body carried one
    pub error: Option<String>,
    /// Description of what went wrong
    pub message: String,
}

impl fmt::Display for TokenExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "HTTP {status}")?;
            if let Some(ref error) = self.error {
                write!(f, " ({error})")?;
            }
            write!(f, " - ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for TokenExchangeError {}
