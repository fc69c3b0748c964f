//! vuetify-mcp - MCP server for Vuetify component APIs and documentation

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vuetify_mcp::config::{Config, ConfigOptions};
use vuetify_mcp::http::{limiter_for, HttpTransport, SessionFactory};
use vuetify_mcp::mcp::{Framing, StdioTransport};
use vuetify_mcp::tools::{build_server, Registrars};
use vuetify_mcp::{AuthContext, CredentialValidator};

#[derive(ValueEnum, Debug, Copy, Clone)]
enum TransportArg {
    Stdio,
    Http,
}

#[derive(ValueEnum, Debug, Copy, Clone)]
enum FramingArg {
    Auto,
    Lsp,
    Line,
}

#[derive(Parser, Debug)]
#[command(name = "vuetify-mcp")]
#[command(about = "MCP server for Vuetify component APIs and documentation")]
struct Args {
    /// Transport to serve: stdio or http
    #[arg(long, value_enum, default_value = "stdio")]
    transport: TransportArg,

    /// Stdio framing: auto, lsp, line
    #[arg(long, value_enum, default_value = "auto")]
    framing: FramingArg,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// HTTP bind host
    #[arg(long)]
    host: Option<String>,

    /// HTTP path of the MCP endpoint
    #[arg(long)]
    path: Option<String>,

    /// Requests allowed per client within the rate limit window
    #[arg(long)]
    rate_limit_max: Option<u32>,

    /// Rate limit window in milliseconds
    #[arg(long)]
    rate_limit_window_ms: Option<u64>,

    /// Maximum request body size in bytes
    #[arg(long)]
    max_body_bytes: Option<usize>,

    /// Seconds allowed for reading a request body
    #[arg(long)]
    body_timeout_secs: Option<u64>,

    /// Vuetify API key (falls back to VUETIFY_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// GitHub token for documentation fetches (falls back to GITHUB_TOKEN)
    #[arg(long)]
    github_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries protocol output in stdio mode
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::new(
        ConfigOptions {
            api_key: args.api_key,
            github_token: args.github_token,
            port: args.port,
            host: args.host,
            path: args.path,
            rate_limit_max: args.rate_limit_max,
            rate_limit_window_ms: args.rate_limit_window_ms,
            max_body_bytes: args.max_body_bytes,
            body_timeout_secs: args.body_timeout_secs,
        }
        .with_env_fallback(),
    )?;

    let registrars = Registrars::default();

    match args.transport {
        TransportArg::Http => {
            info!("Starting Vuetify MCP server (http)");
            let transport = HttpTransport::new(
                config.http.clone(),
                limiter_for(&config),
                SessionFactory::new(registrars),
            );
            let running = transport.start().await?;

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            running.shutdown().await?;
        }
        TransportArg::Stdio => {
            info!("Starting Vuetify MCP server (stdio)");
            let framing = match args.framing {
                FramingArg::Auto => None,
                FramingArg::Lsp => Some(Framing::Lsp),
                FramingArg::Line => Some(Framing::Line),
            };
            let server = build_server(&registrars)?;
            let auth = AuthContext::new(config.api_key.clone());
            let transport = StdioTransport::new(server, auth, framing)
                .with_validator(Arc::new(CredentialValidator::accept_all()));

            if let Err(e) = transport.run().await {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
