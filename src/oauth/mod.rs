//! OAuth 2.0 client-side providers for MCP Gateway
//!
//! Acquires and maintains bearer credentials for calls the gateway makes to
//! downstream servers.
//!
//! Features:
//! - Client-credentials grant (RFC 6749 §4.4) with proactive refresh
//! - Authorization code flow with PKCE (RFC 7636); the URL is shown to the
//!   operator, never opened automatically
//! - Refresh-token grant for interactive tokens
//! - Cross-provider callback routing through an injected [`FlowRegistry`]
//! - Callback route for the hosting HTTP server

mod authorization_code;
mod callback;
mod client_credentials;
mod exchange;
pub mod pkce;
mod prompt;
mod provider;
mod providers;
mod registry;
mod storage;

pub use authorization_code::AuthorizationCodeProvider;
pub use callback::{CallbackParams, callback_router};
pub use client_credentials::ClientCredentialsProvider;
pub use exchange::{ClientIdentity, TokenEndpoint, TokenGrant};
pub use prompt::{AuthorizationRequest, ConsolePrompt, OperatorPrompt, format_remaining};
pub use provider::{AuthProvider, RefreshPolicy, TokenLifecycle, bearer_headers};
pub use providers::{OAuthProvider, ProviderSet};
pub use registry::FlowRegistry;
pub use storage::{MemoryTokenStorage, TokenData, TokenStorage};
