//! Configuration management
//!
//! Provider configuration is immutable after construction and validated
//! eagerly: a bad config fails before any network activity.

use std::{collections::BTreeMap, net::SocketAddr, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Callback route served for interactive flows
    pub callback: CallbackConfig,
    /// Providers keyed by downstream server name
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Config {
    /// Load configuration from a YAML file and `MCP_OAUTH_*` environment
    /// variables (`__` separates nested keys)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_OAUTH_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every provider
    pub fn validate(&self) -> Result<()> {
        if !self.callback.path.starts_with('/') {
            return Err(Error::Config(format!(
                "callback.path must start with '/': {}",
                self.callback.path
            )));
        }
        for (name, provider) in &self.providers {
            provider
                .validate()
                .map_err(|e| Error::Config(format!("provider '{name}': {}", strip_prefix(&e))))?;
        }
        Ok(())
    }
}

fn strip_prefix(err: &Error) -> String {
    match err {
        Error::Config(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Callback route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Address the callback server binds to
    pub bind: SocketAddr,
    /// Route path receiving `state` and `code`
    pub path: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8765)),
            path: "/oauth/callback".to_string(),
        }
    }
}

/// Grant-specific provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "grant", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Machine-to-machine grant
    ClientCredentials(ClientCredentialsConfig),
    /// Interactive grant with PKCE
    AuthorizationCode(AuthorizationCodeConfig),
}

impl ProviderConfig {
    /// Validate the grant-specific config
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ClientCredentials(c) => c.validate(),
            Self::AuthorizationCode(c) => c.validate(),
        }
    }
}

/// Where the client secret is presented to the token endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_secret_post`: secret in the form body
    #[default]
    Post,
    /// `client_secret_basic`: HTTP Basic authorization header
    Basic,
}

/// Client-credentials provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentialsConfig {
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Token endpoint URL
    pub token_endpoint: String,
    /// Requested scope
    #[serde(default)]
    pub scope: Option<String>,
    /// Re-acquire this long before expiry (0 disables proactive refresh)
    #[serde(default = "default_refresh_before_expiry", with = "humantime_serde")]
    pub refresh_before_expiry: Duration,
    /// Lifetime assumed when the server omits `expires_in`
    #[serde(default = "default_token_lifetime", with = "humantime_serde")]
    pub default_token_lifetime: Duration,
    /// Timeout for token endpoint requests
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,
    /// How the secret is sent
    #[serde(default)]
    pub client_auth: ClientAuthMethod,
}

impl ClientCredentialsConfig {
    /// Config with defaults for the optional fields
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: token_endpoint.into(),
            scope: None,
            refresh_before_expiry: default_refresh_before_expiry(),
            default_token_lifetime: default_token_lifetime(),
            http_timeout: default_http_timeout(),
            client_auth: ClientAuthMethod::default(),
        }
    }

    /// Check required fields and URLs
    pub fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("client_secret", &self.client_secret)?;
        parse_endpoint("token_endpoint", &self.token_endpoint)?;
        require_nonzero("default_token_lifetime", self.default_token_lifetime)?;
        require_nonzero("http_timeout", self.http_timeout)?;
        Ok(())
    }
}

/// Authorization-code provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCodeConfig {
    /// Client identifier
    pub client_id: String,
    /// Client secret (confidential clients only)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorization endpoint URL
    pub authorization_endpoint: String,
    /// Token endpoint URL
    pub token_endpoint: String,
    /// Redirect URI registered with the authorization server
    pub redirect_uri: String,
    /// Requested scope
    #[serde(default)]
    pub scope: Option<String>,
    /// Per-flow deadline for the callback to arrive
    #[serde(default = "default_authorization_timeout", with = "humantime_serde")]
    pub authorization_timeout: Duration,
    /// Age after which the sweep expires a pending flow; longer than
    /// `authorization_timeout`
    #[serde(default = "default_stale_state_threshold", with = "humantime_serde")]
    pub stale_state_threshold: Duration,
    /// How often the sweep runs
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// How often the operator is reminded of the remaining time
    #[serde(default = "default_countdown_interval", with = "humantime_serde")]
    pub countdown_interval: Duration,
    /// Serialize concurrent `acquire_token` calls on one instance
    #[serde(default)]
    pub serialize_flows: bool,
    /// Lifetime assumed when the server omits `expires_in`
    #[serde(default = "default_token_lifetime", with = "humantime_serde")]
    pub default_token_lifetime: Duration,
    /// Timeout for token endpoint requests
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,
    /// How the secret is sent
    #[serde(default)]
    pub client_auth: ClientAuthMethod,
}

impl AuthorizationCodeConfig {
    /// Config with defaults for the optional fields
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            redirect_uri: redirect_uri.into(),
            scope: None,
            authorization_timeout: default_authorization_timeout(),
            stale_state_threshold: default_stale_state_threshold(),
            sweep_interval: default_sweep_interval(),
            countdown_interval: default_countdown_interval(),
            serialize_flows: false,
            default_token_lifetime: default_token_lifetime(),
            http_timeout: default_http_timeout(),
            client_auth: ClientAuthMethod::default(),
        }
    }

    /// Check required fields, URLs and timer ordering
    pub fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        parse_endpoint("authorization_endpoint", &self.authorization_endpoint)?;
        parse_endpoint("token_endpoint", &self.token_endpoint)?;
        parse_endpoint("redirect_uri", &self.redirect_uri)?;
        if self.client_auth == ClientAuthMethod::Basic && self.client_secret.is_none() {
            return Err(Error::Config(
                "client_auth 'basic' requires client_secret".to_string(),
            ));
        }
        require_nonzero("authorization_timeout", self.authorization_timeout)?;
        require_nonzero("sweep_interval", self.sweep_interval)?;
        require_nonzero("countdown_interval", self.countdown_interval)?;
        require_nonzero("default_token_lifetime", self.default_token_lifetime)?;
        require_nonzero("http_timeout", self.http_timeout)?;
        if self.stale_state_threshold <= self.authorization_timeout {
            return Err(Error::Config(format!(
                "stale_state_threshold ({:?}) must exceed authorization_timeout ({:?})",
                self.stale_state_threshold, self.authorization_timeout
            )));
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{field} is required")));
    }
    Ok(())
}

fn require_nonzero(field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(Error::Config(format!("{field} must be greater than zero")));
    }
    Ok(())
}

/// Parse an absolute http(s) URL
pub(crate) fn parse_endpoint(field: &str, value: &str) -> Result<Url> {
    require(field, value)?;
    let url = Url::parse(value).map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Config(format!(
            "{field} must be an absolute http(s) URL: {value}"
        )));
    }
    Ok(url)
}

fn default_refresh_before_expiry() -> Duration {
    Duration::from_secs(60)
}

fn default_token_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_authorization_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stale_state_threshold() -> Duration {
    Duration::from_secs(600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_countdown_interval() -> Duration {
    Duration::from_secs(30)
}
