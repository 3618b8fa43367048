use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sitetrack::api::{create_router, AppState};
use sitetrack::auth::AuthService;
use sitetrack::config::Config;
use sitetrack::enrich::Enricher;
use sitetrack::ingest::{Batcher, BatcherConfig};
use sitetrack::query::StatsService;
use sitetrack::storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sitetrack=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Initializing database...");
    let store = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let enricher = Enricher::from_config(&config.analytics)?;
    let auth_service = Arc::new(AuthService::new(config.auth.api_key.clone()));
    if auth_service.is_enabled() {
        info!("🔐 Stats endpoint requires X-API-KEY");
    }

    let shutdown = CancellationToken::new();
    let batcher = Arc::new(Batcher::new(
        Arc::clone(&store),
        BatcherConfig::from(&config.ingest),
    ));
    let worker = {
        let batcher = Arc::clone(&batcher);
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = batcher.run(cancel).await {
                error!("Ingestion batcher exited with error: {e}");
            }
        })
    };

    let state = Arc::new(AppState {
        batcher: Arc::clone(&batcher),
        stats: StatsService::new(Arc::clone(&store), config.query.timeout()),
        enricher,
        accept_timeout: config.ingest.accept_timeout(),
        shutdown: shutdown.clone(),
    });
    let app = create_router(state, auth_service);

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 Tracking server listening on http://{}", addr);
    info!("   - GET/POST /track, POST /stats, GET /health");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping server...");
    })
    .await?;

    info!("Server stopped, draining ingestion queue...");
    shutdown.cancel();
    batcher.shutdown().await;
    if let Err(e) = worker.await {
        error!("Ingestion worker task failed: {e}");
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
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
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
