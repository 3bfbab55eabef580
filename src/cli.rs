//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OAuth credentials for MCP Gateway downstream servers
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway-oauth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_OAUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_OAUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_OAUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration and list providers
    Check,

    /// Obtain request headers for a provider, serving the callback route
    /// while an interactive flow is pending
    Headers {
        /// Provider name from the configuration
        #[arg(required = true)]
        provider: String,

        /// Print the full header value instead of a masked one
        #[arg(long)]
        reveal: bool,
    },
}
