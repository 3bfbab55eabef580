//! Flow registry
//!
//! Process-wide index from an opaque `state` to the authorization-code
//! provider that created it. Constructed once by the host and injected into
//! every provider, so a callback arriving on any route finds its provider.
//!
//! Entries hold [`Weak`] references: the registry never keeps a provider
//! alive, and a dropped provider simply stops resolving.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use super::authorization_code::AuthorizationCodeProvider;

/// `state` → provider routing table
#[derive(Default)]
pub struct FlowRegistry {
    routes: DashMap<String, Weak<AuthorizationCodeProvider>>,
}

impl FlowRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `state` to `provider`. Returns `false` if the state was
    /// already registered (the existing route is kept).
    pub fn register(&self, state: &str, provider: Weak<AuthorizationCodeProvider>) -> bool {
        let inserted = match self.routes.entry(state.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(provider);
                true
            }
        };
        // entry guard released above; len() locks every shard
        if inserted {
            trace!(routes = self.routes.len(), "Registered authorization state");
        }
        inserted
    }

    /// Remove the route for `state`. Returns whether one existed.
    pub fn unregister(&self, state: &str) -> bool {
        self.routes.remove(state).is_some()
    }

    /// O(1) lookup of the provider that issued `state`
    #[must_use]
    pub fn provider_for_state(&self, state: &str) -> Option<Arc<AuthorizationCodeProvider>> {
        self.routes.get(state).and_then(|p| p.upgrade())
    }

    /// Whether `state` is routed
    #[must_use]
    pub fn contains(&self, state: &str) -> bool {
        self.routes.contains_key(state)
    }

    /// Number of routed states
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// No routed states
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("routes", &self.routes.len())
            .finish()
    }
}
