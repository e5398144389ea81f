//! pvemcp - MCP gateway for a Proxmox VE node.
//!
//! Serves `GET /sse` and `POST /message` (MCP HTTP+SSE transport) plus
//! `GET /health`. Listens with TLS when certificate material is configured
//! and loads cleanly, otherwise on plain HTTP.

use clap::Parser as ClapParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use pvemcp::{
    api,
    config::{ConfigError, FileConfig, GatewayConfig, Overrides},
    mcp::tools::RegistryError,
    server, tls,
    upstream::{UpstreamClient, UpstreamError},
};

/// pvemcp - MCP gateway for a Proxmox VE node
#[derive(ClapParser, Debug)]
#[command(name = "pvemcp", version, about, long_about = None)]
struct Cli {
    /// Optional TOML config file
    #[arg(long, env = "PVEMCP_CONFIG")]
    config: Option<PathBuf>,

    /// Plain HTTP listen address [default: 0.0.0.0:3000]
    #[arg(long, env = "PVEMCP_BIND")]
    bind: Option<SocketAddr>,

    /// HTTPS listen address [default: 0.0.0.0:3443]
    #[arg(long, env = "PVEMCP_TLS_BIND")]
    tls_bind: Option<SocketAddr>,

    /// PEM certificate chain for HTTPS
    #[arg(long, env = "PVEMCP_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for HTTPS
    #[arg(long, env = "PVEMCP_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Proxmox API base URL, e.g. https://pve.lan:8006/api2/json
    #[arg(long, env = "PROXMOX_API_URL")]
    upstream_url: Option<String>,

    /// Proxmox API token (USER@REALM!TOKENID=SECRET)
    #[arg(long, env = "PROXMOX_API_TOKEN", hide_env_values = true)]
    upstream_token: Option<String>,

    /// Proxmox node to query [default: pve]
    #[arg(long, env = "PROXMOX_NODE")]
    node: Option<String>,

    /// Per-request upstream timeout in seconds [default: 30]
    #[arg(long, env = "PVEMCP_UPSTREAM_TIMEOUT_SECS")]
    upstream_timeout_secs: Option<u64>,

    /// Verify the upstream API's TLS certificate (off by default because
    /// Proxmox ships a self-signed certificate)
    #[arg(long, env = "PVEMCP_VERIFY_UPSTREAM_TLS")]
    verify_upstream_tls: Option<bool>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind,
            tls_bind: self.tls_bind,
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
            upstream_url: self.upstream_url.clone(),
            upstream_token: self.upstream_token.clone(),
            node: self.node.clone(),
            upstream_timeout_secs: self.upstream_timeout_secs,
            verify_upstream_tls: self.verify_upstream_tls,
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream client error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("tool registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pvemcp=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), GatewayError> {
    let cli = Cli::parse();
    init_tracing();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = GatewayConfig::resolve(cli.overrides(), file)?;

    if !config.upstream.verify_tls {
        tracing::warn!("upstream TLS certificate verification is disabled");
    }
    let upstream = UpstreamClient::new(&config.upstream)?;
    tracing::info!(
        url = %config.upstream.base_url,
        node = %config.upstream.node,
        "upstream configured"
    );

    let state = api::AppState::new(upstream)?;
    let sessions = state.sessions.clone();
    let app = api::router(state);

    let plan = tls::plan_listener(&config.listener);
    let shutdown = CancellationToken::new();
    let mut server_handle = tokio::spawn(server::run(app, plan, shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
        }
        // Bind failures land here before any signal arrives.
        result = &mut server_handle => {
            return match result {
                Ok(outcome) => outcome.map_err(GatewayError::from),
                Err(e) => Err(std::io::Error::other(e).into()),
            };
        }
    }

    // End the open event stream so graceful shutdown can complete.
    sessions.detach_active();
    shutdown.cancel();

    match server_handle.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "server stopped with error"),
        Err(e) => tracing::warn!(?e, "server task panicked"),
        Ok(Ok(())) => {}
    }

    tracing::info!("pvemcp exiting");
    Ok(())
}
