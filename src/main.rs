//! Dashbridge Server
//!
//! Run with: cargo run --bin dashbridge -- --config dashbridge.toml
//!
//! # Configuration
//!
//! Without `--config` the server looks in the default locations (see
//! [`Config::load_default`]) and then applies environment overrides:
//! - `MQTT_URL`: MQTT broker address (default: tcp://localhost:1883)
//! - `INFLUX_URL`: Time-series database proxied under /api/influxdb
//! - `INFLUXDB_TOKEN`: Token sent to the database
//! - `STATIC_ASSETS`: Dashboard build directory
//! - `DASHBRIDGE_HOST` / `DASHBRIDGE_PORT`: Bind address (default: 0.0.0.0:8080)
//! - `RUST_LOG`: Log filter (overrides the configured level)

use anyhow::Context;
use clap::Parser;
use dashbridge::api::{serve, AppState};
use dashbridge::broker::MqttConnector;
use dashbridge::config::{generate_default_config, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dashbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "WebSocket to MQTT relay and dashboard gateway")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a commented default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    config.validate().context("invalid configuration")?;

    dashbridge::logging::init(&config.logging);

    tracing::info!("Starting Dashbridge v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.broker.settings()?;
    tracing::info!(broker = %settings.address, "Relay sessions will connect to broker");
    match &config.influx.url {
        Some(url) => tracing::info!(upstream = %url, "Time-series proxy enabled"),
        None => tracing::warn!("INFLUX_URL not set, /api/influxdb will answer 503"),
    }
    if config.auth.enabled {
        tracing::info!(realm = %config.auth.realm, "Authentication required on /api");
    }

    let connector = Arc::new(MqttConnector::new(settings));
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, connector, shutdown.clone())
        .context("building application state")?;

    serve(state, shutdown).await?;
    Ok(())
}
