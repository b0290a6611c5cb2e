//! Clipfund Server
//!
//! HTTP surface for the metrics refresh scheduler and payout engine.
//!
//! # Usage
//!
//! ```bash
//! # Local run against the in-memory store
//! clipfund-server --in-memory --cron-secret dev --webhook-secret dev
//!
//! # Start with a config file
//! clipfund-server --config /etc/clipfund/server.toml
//!
//! # Environment overrides
//! CLIPFUND__SERVER__PORT=8080 clipfund-server
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipfund_db::{MemoryStore, PgStore, Store};
use clipfund_engine::{Engine, EngineContext, SystemClock};
use clipfund_ingest::{HttpMetricsProvider, WebhookVerifier};
use clipfund_server::config::{LoggingConfig, MetricsConfig};
use clipfund_server::{create_router, drain_background, validate_config, AppState, ServerConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Clipfund metrics scheduler and payout engine
#[derive(Parser, Debug)]
#[command(name = "clipfund-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "CLIPFUND_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "CLIPFUND_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CLIPFUND_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CLIPFUND_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "CLIPFUND_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Bearer secret for the cron endpoints
    #[arg(long, env = "CRON_SECRET", hide_env_values = true)]
    cron_secret: Option<String>,

    /// HMAC secret for provider webhooks
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Operator token for the admin endpoints
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Keep all state in memory (development only)
    #[arg(long, env = "CLIPFUND_IN_MEMORY")]
    in_memory: bool,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    apply_overrides(&mut server_config, args);

    init_logging(&server_config.logging)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Clipfund server");

    validate_config(&server_config)?;

    if server_config.metrics.enabled {
        start_metrics_server(&server_config.metrics)?;
    }

    let store = init_store(&server_config).await?;
    let provider = Arc::new(HttpMetricsProvider::new(server_config.provider.clone())?);
    let ctx = EngineContext::new(
        store,
        provider,
        Arc::new(SystemClock),
        server_config.engine(),
    )?;
    let verifier = WebhookVerifier::new(
        server_config.webhook.secret.clone(),
        server_config.allowlist()?,
        server_config.webhook.trust_forwarded_for,
    );
    let state = Arc::new(AppState::new(
        Engine::new(ctx),
        verifier,
        server_config.auth.clone(),
    ));

    let background = state.background.clone();
    let app = create_router(state, &server_config.server.cors_origins);
    let addr = server_config.server.socket_addr()?;

    tracing::info!(
        host = %server_config.server.host,
        port = %server_config.server.port,
        "Server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // acknowledged webhooks are still being applied
    drain_background(&background, server_config.server.shutdown_timeout()).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn apply_overrides(config: &mut ServerConfig, args: Args) {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(secret) = args.cron_secret {
        config.auth.cron_secret = secret;
    }
    if let Some(secret) = args.webhook_secret {
        config.webhook.secret = secret;
    }
    if args.admin_token.is_some() {
        config.auth.admin_token = args.admin_token;
    }
    if args.in_memory {
        config.server.in_memory = true;
    }
}

// =============================================================================
// Initialization Functions
// =============================================================================

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

async fn init_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.server.in_memory {
        tracing::warn!("Using the in-memory store; all state is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(&config.database).await?;
    if config.database.run_migrations {
        store.migrate().await?;
    }
    store.ping().await?;
    tracing::info!(url = %config.database.url_masked(), "Store ready");
    Ok(Arc::new(store))
}

fn start_metrics_server(config: &MetricsConfig) -> anyhow::Result<()> {
    if let Some(port) = config.port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        // the exporter runs its own listener task once installed
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(port, "Metrics exporter started");
    }
    Ok(())
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
