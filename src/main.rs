//! MCP Gateway OAuth - credential helper for downstream MCP servers

use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use mcp_gateway_oauth::{
    cli::{Cli, Command},
    config::Config,
    oauth::{AuthProvider, ProviderSet, callback_router},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Check => run_check(&config),
        Command::Headers { provider, reveal } => run_headers(&config, &provider, reveal).await,
    }
}

/// Build every provider and report what was configured
fn run_check(config: &Config) -> ExitCode {
    match ProviderSet::from_config(config) {
        Ok(set) => {
            if set.is_empty() {
                println!("No providers configured.");
            }
            for name in set.names() {
                if let Some(provider) = set.get(name) {
                    println!("{name}: {}", provider.grant());
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Acquire headers for one provider
async fn run_headers(config: &Config, name: &str, reveal: bool) -> ExitCode {
    let set = match ProviderSet::from_config(config) {
        Ok(set) => set,
        Err(e) => {
            error!("Failed to build providers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Some(provider) = set.get(name) else {
        eprintln!("Unknown provider '{name}'. Configured: {}", set.names().collect::<Vec<_>>().join(", "));
        return ExitCode::FAILURE;
    };

    // the callback route is only needed while an interactive flow is pending
    let server = if provider.as_authorization_code().is_some() {
        let listener = match TcpListener::bind(config.callback.bind).await {
            Ok(l) => l,
            Err(e) => {
                error!(bind = %config.callback.bind, "Failed to bind callback server: {e}");
                return ExitCode::FAILURE;
            }
        };
        info!(bind = %config.callback.bind, path = %config.callback.path, "OAuth callback server listening");
        let app = callback_router(std::sync::Arc::clone(set.registry()), &config.callback.path);
        Some(tokio::spawn(async move { axum::serve(listener, app).await }))
    } else {
        None
    };

    let result = tokio::select! {
        result = provider.get_headers() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling pending authorization");
            provider.destroy();
            if let Some(server) = server {
                server.abort();
            }
            return ExitCode::FAILURE;
        }
    };

    if let Some(server) = server {
        server.abort();
    }

    match result {
        Ok(headers) => {
            for (key, value) in &headers {
                if reveal {
                    println!("{key}: {value}");
                } else {
                    println!("{key}: {}", mask(value));
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to obtain credentials ({}): {e}", e.kind());
            if e.is_retryable() {
                eprintln!("Run the command again to start a new attempt.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Keep the scheme and a short prefix of the credential
fn mask(value: &str) -> String {
    match value.split_once(' ') {
        Some((scheme, token)) => {
            let prefix: String = token.chars().take(4).collect();
            format!("{scheme} {prefix}…")
        }
        None => "…".to_string(),
    }
}
