//! MCP Gateway OAuth
//!
//! Bearer credentials for the outbound calls an MCP gateway makes on behalf
//! of downstream tool servers.
//!
//! # Features
//!
//! - **Client credentials**: machine-to-machine tokens, refreshed before expiry
//! - **Authorization code + PKCE**: interactive flows that wait for an
//!   asynchronous callback, each with its own deadline and exactly-once
//!   settlement
//! - **Flow registry**: routes a callback to whichever provider issued its state
//! - **Typed errors**: one taxonomy across grants (timeout vs. invalid code
//!   vs. invalid state)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;

pub use error::{Error, Result, TokenExchangeError};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
