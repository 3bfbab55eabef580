//! Closed set of grant variants and the scoped owner of a provider fleet

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::authorization_code::AuthorizationCodeProvider;
use super::client_credentials::ClientCredentialsProvider;
use super::provider::AuthProvider;
use super::registry::FlowRegistry;
use crate::Result;
use crate::config::{Config, ProviderConfig};

/// A configured provider of either grant type
#[derive(Clone)]
pub enum OAuthProvider {
    /// Machine-to-machine grant
    ClientCredentials(Arc<ClientCredentialsProvider>),
    /// Interactive grant
    AuthorizationCode(Arc<AuthorizationCodeProvider>),
}

impl OAuthProvider {
    /// Build a provider from its config, routing interactive flows through
    /// `registry`
    pub fn from_config(name: &str, config: &ProviderConfig, registry: &Arc<FlowRegistry>) -> Result<Self> {
        Ok(match config {
            ProviderConfig::ClientCredentials(c) => {
                Self::ClientCredentials(Arc::new(ClientCredentialsProvider::new(name, c)?))
            }
            ProviderConfig::AuthorizationCode(c) => {
                Self::AuthorizationCode(AuthorizationCodeProvider::new(name, c, Arc::clone(registry))?)
            }
        })
    }

    /// The interactive variant, if this is one
    #[must_use]
    pub fn as_authorization_code(&self) -> Option<&Arc<AuthorizationCodeProvider>> {
        match self {
            Self::AuthorizationCode(p) => Some(p),
            Self::ClientCredentials(_) => None,
        }
    }

    /// Grant type name as used in config
    #[must_use]
    pub fn grant(&self) -> &'static str {
        match self {
            Self::ClientCredentials(_) => "client_credentials",
            Self::AuthorizationCode(_) => "authorization_code",
        }
    }

    fn inner(&self) -> &dyn AuthProvider {
        match self {
            Self::ClientCredentials(p) => &**p as &dyn AuthProvider,
            Self::AuthorizationCode(p) => &**p,
        }
    }

    /// Release the provider's pending work
    pub fn destroy(&self) {
        if let Self::AuthorizationCode(p) = self {
            p.destroy();
        }
    }
}

#[async_trait]
impl AuthProvider for OAuthProvider {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn get_headers(&self) -> Result<HashMap<String, String>> {
        self.inner().get_headers().await
    }

    fn is_valid(&self) -> bool {
        self.inner().is_valid()
    }

    fn supports_refresh(&self) -> bool {
        self.inner().supports_refresh()
    }

    async fn refresh(&self) -> Result<()> {
        self.inner().refresh().await
    }
}

/// Every configured provider plus the registry they share.
///
/// Owns provider lifetime: dropping the set destroys every provider, so
/// pending callers are released on shutdown, errors and reconfiguration.
pub struct ProviderSet {
    registry: Arc<FlowRegistry>,
    providers: BTreeMap<String, OAuthProvider>,
}

impl ProviderSet {
    /// Build all providers; fails on the first invalid one
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(FlowRegistry::new());
        let mut providers = BTreeMap::new();
        for (name, provider_config) in &config.providers {
            let provider = OAuthProvider::from_config(name, provider_config, &registry)?;
            info!(provider = %name, grant = provider.grant(), "Configured OAuth provider");
            providers.insert(name.clone(), provider);
        }
        Ok(Self { registry, providers })
    }

    /// Shared flow registry (hand to the callback route)
    #[must_use]
    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    /// Provider by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OAuthProvider> {
        self.providers.get(name)
    }

    /// Provider names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Number of providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// No providers configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Drop for ProviderSet {
    fn drop(&mut self) {
        for provider in self.providers.values() {
            provider.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorizationCodeConfig, ClientCredentialsConfig};

    fn config() -> Config {
        let mut config = Config::default();
        config.providers.insert(
            "search".to_string(),
            ProviderConfig::ClientCredentials(ClientCredentialsConfig::new(
                "id",
                "secret",
                "https://auth.example.com/token",
            )),
        );
        config.providers.insert(
            "github".to_string(),
            ProviderConfig::AuthorizationCode(AuthorizationCodeConfig::new(
                "gh",
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
                "http://127.0.0.1:8765/oauth/callback",
            )),
        );
        config
    }

    #[test]
    fn builds_both_grant_variants() {
        let set = ProviderSet::from_config(&config()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["github", "search"]);

        let github = set.get("github").unwrap();
        assert_eq!(github.grant(), "authorization_code");
        assert!(github.as_authorization_code().is_some());
        assert_eq!(github.name(), "github");

        let search = set.get("search").unwrap();
        assert!(search.as_authorization_code().is_none());
        assert!(!search.is_valid());
    }

    #[test]
    fn invalid_provider_fails_the_set() {
        let mut config = config();
        config.providers.insert(
            "broken".to_string(),
            ProviderConfig::ClientCredentials(ClientCredentialsConfig::new("", "s", "https://a.example.com/t")),
        );
        assert!(ProviderSet::from_config(&config).is_err());
    }

    #[test]
    fn dropping_the_set_destroys_interactive_providers() {
        let set = ProviderSet::from_config(&config()).unwrap();
        let github = Arc::clone(set.get("github").unwrap().as_authorization_code().unwrap());
        assert!(!github.is_destroyed());
        drop(set);
        assert!(github.is_destroyed());
    }
}
