//! Operator-facing output for interactive flows
//!
//! The authorization URL is shown to the operator, never opened in a browser.
//! Output is informational only.

use std::io::Write;
use std::time::Duration;

use tracing::info;

/// A pending interactive authorization, as shown to the operator
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider that started the flow
    pub provider: String,
    /// Opaque state bound to this flow
    pub state: String,
    /// URL the operator must visit
    pub url: String,
    /// Per-flow deadline
    pub timeout: Duration,
}

/// Sink for operator-facing flow output
pub trait OperatorPrompt: Send + Sync {
    /// A flow was registered and is waiting for the operator
    fn authorization_required(&self, request: &AuthorizationRequest);

    /// Periodic reminder while the flow is pending
    fn waiting(&self, request: &AuthorizationRequest, remaining: Duration) {
        let _ = (request, remaining);
    }
}

/// Writes prompts to stderr and the log
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl OperatorPrompt for ConsolePrompt {
    fn authorization_required(&self, request: &AuthorizationRequest) {
        info!(provider = %request.provider, "Authorization required");
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "\n[{}] Authorize access by visiting:\n{}\n(waiting up to {})\n",
            request.provider,
            request.url,
            format_remaining(request.timeout)
        );
    }

    fn waiting(&self, request: &AuthorizationRequest, remaining: Duration) {
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{}] Still waiting for authorization, {} remaining",
            request.provider,
            format_remaining(remaining)
        );
    }
}

/// Render a countdown as `4m 05s` / `42s`
#[must_use]
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
