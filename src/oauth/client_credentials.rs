//! Client-credentials grant (RFC 6749 §4.4)
//!
//! Machine-to-machine: no user interaction, no PKCE, no pending flows.
//! Refreshing is simply exchanging again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument};

use super::exchange::{ClientIdentity, TokenEndpoint, TokenGrant};
use super::provider::{AuthProvider, RefreshPolicy, TokenLifecycle};
use super::storage::{MemoryTokenStorage, TokenStorage};
use crate::config::{ClientCredentialsConfig, parse_endpoint};
use crate::{Error, Result};

/// Client-credentials provider
pub struct ClientCredentialsProvider {
    lifecycle: TokenLifecycle,
    endpoint: TokenEndpoint,
    scope: Option<String>,
}

impl ClientCredentialsProvider {
    /// Create a provider with in-memory storage and its own HTTP client
    pub fn new(name: impl Into<String>, config: &ClientCredentialsConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Self::with_parts(name, config, http, Arc::new(MemoryTokenStorage::new()))
    }

    /// Create a provider with an explicit HTTP client and storage
    pub fn with_parts(
        name: impl Into<String>,
        config: &ClientCredentialsConfig,
        http: Client,
        storage: Arc<dyn TokenStorage>,
    ) -> Result<Self> {
        config.validate()?;
        let token_url = parse_endpoint("token_endpoint", &config.token_endpoint)?;

        let endpoint = TokenEndpoint::new(
            http,
            token_url,
            ClientIdentity {
                client_id: config.client_id.clone(),
                client_secret: Some(config.client_secret.clone()),
                auth_method: config.client_auth,
            },
            config.default_token_lifetime,
        );

        Ok(Self {
            lifecycle: TokenLifecycle::new(
                name,
                storage,
                RefreshPolicy::from_window(config.refresh_before_expiry),
            ),
            endpoint,
            scope: config.scope.clone(),
        })
    }

    /// Exchange client credentials for a token and store it
    #[instrument(skip(self), fields(provider = %self.lifecycle.name()))]
    pub async fn acquire_token(&self) -> Result<()> {
        let grant = TokenGrant::ClientCredentials {
            scope: self.scope.as_deref(),
        };
        let token = self.endpoint.exchange(&grant).await?;
        info!(expires_at = %token.expires_at, "Acquired client-credentials token");
        self.lifecycle.storage().store(token);
        Ok(())
    }

    /// Token storage
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn TokenStorage> {
        self.lifecycle.storage()
    }
}

#[async_trait]
impl AuthProvider for ClientCredentialsProvider {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    async fn get_headers(&self) -> Result<HashMap<String, String>> {
        self.lifecycle.headers(|| self.acquire_token()).await
    }

    fn is_valid(&self) -> bool {
        self.lifecycle.is_valid()
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self) -> Result<()> {
        self.acquire_token().await
    }
}
