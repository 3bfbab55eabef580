//! Token endpoint protocol (RFC 6749 §4.1.3, §4.4.2, §6)
//!
//! Builds form-encoded token requests, validates responses and funnels every
//! failure through [`map_failure`] so all grants report the same taxonomy.

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::storage::{TokenData, expiry_from_now};
use crate::config::ClientAuthMethod;
use crate::error::TokenExchangeError;

/// Grant-specific part of a token request
#[derive(Debug, Clone, Copy)]
pub enum TokenGrant<'a> {
    /// Exchange an authorization code (with its PKCE verifier)
    AuthorizationCode {
        /// Code delivered to the redirect URI
        code: &'a str,
        /// Redirect URI used in the authorization request
        redirect_uri: &'a str,
        /// PKCE verifier bound to the code
        code_verifier: &'a str,
    },
    /// Machine-to-machine grant
    ClientCredentials {
        /// Requested scope
        scope: Option<&'a str>,
    },
    /// Redeem a refresh token
    RefreshToken {
        /// Refresh token from a previous response
        refresh_token: &'a str,
        /// Requested scope (must not exceed the original grant)
        scope: Option<&'a str>,
    },
}

impl TokenGrant<'_> {
    /// Value of the `grant_type` form field
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::ClientCredentials { .. } => "client_credentials",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// How the client identifies itself to the token endpoint
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Client identifier
    pub client_id: String,
    /// Client secret, absent for public clients
    pub client_secret: Option<String>,
    /// Where the secret is sent
    pub auth_method: ClientAuthMethod,
}

/// Raw token response; required fields are checked after parsing so a missing
/// field maps to a typed error instead of a serde message
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// RFC 6749 §5.2 error body
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Every way a token request can fail before normalization
#[derive(Debug)]
pub(crate) enum ExchangeFailure {
    Transport(reqwest::Error),
    Status { status: StatusCode, body: String },
    Malformed(String),
}

/// Map any token endpoint failure into the shared error taxonomy
pub(crate) fn map_failure(failure: ExchangeFailure) -> TokenExchangeError {
    match failure {
        ExchangeFailure::Transport(e) => TokenExchangeError {
            status: e.status().map(|s| s.as_u16()),
            error: None,
            message: format!("Token request failed: {e}"),
        },
        ExchangeFailure::Status { status, body } => match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => TokenExchangeError {
                status: Some(status.as_u16()),
                message: err.error_description.unwrap_or_else(|| err.error.clone()),
                error: Some(err.error),
            },
            Err(_) => TokenExchangeError {
                status: Some(status.as_u16()),
                error: None,
                message: if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("request rejected").to_string()
                } else {
                    truncate(body.trim(), 200)
                },
            },
        },
        ExchangeFailure::Malformed(message) => TokenExchangeError {
            status: None,
            error: None,
            message,
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Build the form body for a grant
pub(crate) fn build_form(grant: &TokenGrant<'_>, client: &ClientIdentity) -> Vec<(&'static str, String)> {
    let mut form = vec![("grant_type", grant.grant_type().to_string())];

    match *grant {
        TokenGrant::AuthorizationCode {
            code,
            redirect_uri,
            code_verifier,
        } => {
            form.push(("code", code.to_string()));
            form.push(("redirect_uri", redirect_uri.to_string()));
            form.push(("code_verifier", code_verifier.to_string()));
        }
        TokenGrant::ClientCredentials { scope } => {
            if let Some(scope) = scope {
                form.push(("scope", scope.to_string()));
            }
        }
        TokenGrant::RefreshToken { refresh_token, scope } => {
            form.push(("refresh_token", refresh_token.to_string()));
            if let Some(scope) = scope {
                form.push(("scope", scope.to_string()));
            }
        }
    }

    form.push(("client_id", client.client_id.clone()));
    if client.auth_method == ClientAuthMethod::Post {
        if let Some(ref secret) = client.client_secret {
            form.push(("client_secret", secret.clone()));
        }
    }

    form
}

/// Validate a successful response body and turn it into [`TokenData`]
pub(crate) fn parse_token_response(body: &str, default_lifetime: Duration) -> Result<TokenData, ExchangeFailure> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ExchangeFailure::Malformed(format!("Failed to parse token response: {e}")))?;

    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExchangeFailure::Malformed("Token response missing access_token".to_string()))?;
    let token_type = response
        .token_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExchangeFailure::Malformed("Token response missing token_type".to_string()))?;

    let lifetime = response.expires_in.map_or(default_lifetime, Duration::from_secs);

    Ok(TokenData {
        access_token,
        token_type,
        expires_at: expiry_from_now(lifetime),
        refresh_token: response.refresh_token,
        scope: response.scope,
    })
}

/// A token endpoint bound to one client registration
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    http: Client,
    url: Url,
    client: ClientIdentity,
    default_lifetime: Duration,
}

impl TokenEndpoint {
    /// Create an endpoint helper
    #[must_use]
    pub fn new(http: Client, url: Url, client: ClientIdentity, default_lifetime: Duration) -> Self {
        Self {
            http,
            url,
            client,
            default_lifetime,
        }
    }

    /// Client identity used for requests
    #[must_use]
    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }

    /// POST a grant to the token endpoint
    pub async fn exchange(&self, grant: &TokenGrant<'_>) -> Result<TokenData, TokenExchangeError> {
        self.send(grant).await.map_err(map_failure)
    }

    async fn send(&self, grant: &TokenGrant<'_>) -> Result<TokenData, ExchangeFailure> {
        debug!(url = %self.url, grant_type = grant.grant_type(), "Requesting token");

        let form = build_form(grant, &self.client);
        let mut request = self
            .http
            .post(self.url.clone())
            .header(header::ACCEPT, "application/json")
            .form(&form);

        if self.client.auth_method == ClientAuthMethod::Basic {
            request = request.basic_auth(&self.client.client_id, self.client.client_secret.as_deref());
        }

        let response = request.send().await.map_err(ExchangeFailure::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ExchangeFailure::Transport)?;

        if !status.is_success() {
            return Err(ExchangeFailure::Status { status, body });
        }

        parse_token_response(&body, self.default_lifetime)
    }
}
