//! Gatekeeper
//!
//! Serves the API behind the security gate: rate limiting, session and bearer
//! authentication, role checks and response hardening.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gatekeeper_api::{build_router, services::maintenance, AppState, Config, LogFormat};
use gatekeeper_security::constants::MAINTENANCE_INTERVAL;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Security gate and auth API")]
struct Args {
    /// Directory holding default.* and {APP_ENV}.* configuration files
    #[arg(long, env = "GATEKEEPER_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load(&args.config_dir).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config)?;

    let config = config.finalize().context("Invalid configuration")?;
    info!(
        environment = %config.environment,
        "Starting Gatekeeper v{}",
        env!("CARGO_PKG_VERSION")
    );

    let metrics = if config.observability.metrics_enabled {
        Some(init_metrics()?)
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    let state = AppState::new(config, metrics)?;
    state.seed_bootstrap_admin()?;

    let maintenance_task = maintenance::spawn(state.clone(), MAINTENANCE_INTERVAL);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Gatekeeper listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance_task.abort();
    info!("Gatekeeper shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_filter))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.observability.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?,
    }

    Ok(())
}

fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            warn!("Received SIGTERM, shutting down gracefully");
        },
    }
}
