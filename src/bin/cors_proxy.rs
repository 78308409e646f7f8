//! Dashbridge CORS Proxy
//!
//! Standalone reverse proxy that adds CORS headers to a single upstream,
//! for dashboards that talk to the time-series database directly.
//!
//! Run with: TARGET=http://localhost:8086 cargo run --bin dashbridge-proxy

use anyhow::Context;
use clap::Parser;
use dashbridge::api::shutdown_signal;
use dashbridge::config::LoggingConfig;
use dashbridge::proxy::{self, ProxyOptions, ReverseProxy};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dashbridge-proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CORS reverse proxy for a single upstream")]
struct Cli {
    /// Upstream base URL
    #[arg(long, env = "TARGET")]
    target: String,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 9086)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dashbridge::logging::init(&LoggingConfig::default());

    let proxy = ReverseProxy::new(ProxyOptions {
        target: Some(cli.target.clone()),
        ..ProxyOptions::default()
    })
    .context("invalid target")?;

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!(upstream = %cli.target, "CORS proxy listening on {}", addr);

    axum::serve(listener, proxy::router(Arc::new(proxy)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
