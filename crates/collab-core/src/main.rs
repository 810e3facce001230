use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use clap::Parser;
use collab_config::CollabConfig;
use collab_core::auth::InMemoryAuthorityStore;
use collab_core::health::{health_handler, HealthState};
use collab_core::observer::TracingObserver;
use collab_core::session::SessionRegistry;
use collab_core::ws::{ws_handler, AppState};
use collab_core::maintenance;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Realtime collaboration core: session registry, event dispatch, resource
/// locks, presence, and parameter-change throttling for a browser DAW.
#[derive(Parser, Debug)]
#[command(name = "collab-core", version, about)]
struct Cli {
    /// Path to a TOML config file. Overrides the default search path.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Print the effective configuration (after file and env overrides) and
    /// exit without starting the server.
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = CollabConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    if cli.show_config {
        println!("{}", config.to_toml().context("failed to render configuration")?);
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_new(&config.telemetry.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        files = ?sources.files,
        env_overrides = ?sources.env_overrides,
        "configuration loaded"
    );

    let config = Arc::new(config);
    let registry = Arc::new(SessionRegistry::new(config.session.event_id_history, Arc::new(TracingObserver)));
    let authority = Arc::new(InMemoryAuthorityStore::new());

    let shutdown = CancellationToken::new();
    maintenance::spawn_sweeps(registry.clone(), config.clone(), shutdown.clone());

    let ws_state = Arc::new(AppState {
        registry: registry.clone(),
        authority,
        config: config.clone(),
    });
    let health_state = Arc::new(HealthState {
        registry: registry.clone(),
        started_at: Utc::now(),
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(ws_state)
        .merge(Router::new().route("/healthz", get(health_handler)).with_state(health_state));

    let addr = format!("{}:{}", config.bind.host, config.bind.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            shutdown_signal.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
