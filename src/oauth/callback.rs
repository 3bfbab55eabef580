//! OAuth Callback Route
//!
//! Receives the authorization server's redirect, routes it through the
//! [`FlowRegistry`] to the provider that issued the `state`, and renders a
//! small HTML page for the operator's browser.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::registry::FlowRegistry;
use crate::Error;

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (CSRF binding)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Router serving the callback at `path`
pub fn callback_router(registry: Arc<FlowRegistry>, path: &str) -> Router {
    Router::new()
        .route(path, get(handle_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Handle the OAuth callback
async fn handle_callback(
    State(registry): State<Arc<FlowRegistry>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    debug!(
        has_code = params.code.is_some(),
        has_state = params.state.is_some(),
        error = ?params.error,
        "Received OAuth callback"
    );

    let Some(state) = params.state else {
        return page(StatusCode::BAD_REQUEST, "missing_state", "State parameter not provided");
    };

    // unknown state: answer without touching any provider
    let Some(provider) = registry.provider_for_state(&state) else {
        return page(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "This authorization attempt is unknown or has expired. Start the login again.",
        );
    };

    if let Some(error) = params.error {
        let description = params
            .error_description
            .as_deref()
            .unwrap_or("The authorization server reported an error");
        return match provider.abort_oauth_flow(&state, &error, Some(description)) {
            Ok(()) => page(StatusCode::BAD_REQUEST, &error, description),
            Err(e) => error_response(&e),
        };
    }

    // a redirect with neither code nor error can never complete this flow
    let Some(code) = params.code else {
        let description = "Authorization code not provided";
        return match provider.abort_oauth_flow(&state, "invalid_request", Some(description)) {
            Ok(()) => page(StatusCode::BAD_REQUEST, "invalid_request", description),
            Err(e) => error_response(&e),
        };
    };

    match provider.complete_oauth_flow(&state, &code).await {
        Ok(()) => Html(success_page()).into_response(),
        Err(e) => {
            warn!(error = %e, "OAuth callback failed");
            error_response(&e)
        }
    }
}

fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::InvalidState(_) => StatusCode::BAD_REQUEST,
        Error::TokenExchange(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    page(status, err.kind(), &err.to_string())
}

fn page(status: StatusCode, error: &str, description: &str) -> Response {
    (status, Html(error_page(error, description))).into_response()
}

const STYLE: &str = "body{font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;\
display:flex;justify-content:center;align-items:center;height:100vh;margin:0}\
.container{text-align:center;padding:2rem;max-width:420px}\
.error-code{font-family:monospace;margin-top:1rem;opacity:.7}";

fn success_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Successful</title><style>{STYLE}</style></head>
<body>
    <div class="container">
        <h1>Authorization Successful</h1>
        <p>You can close this window and return to MCP Gateway.</p>
    </div>
</body>
</html>"#
    )
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title><style>{STYLE}</style></head>
<body>
    <div class="container">
        <h1>Authorization Failed</h1>
        <p>{}</p>
        <p class="error-code">Error: {}</p>
    </div>
</body>
</html>"#,
        escape_html(description),
        escape_html(error)
    )
}

/// Query values are attacker-controlled; never echo them raw
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
