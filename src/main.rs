use anyhow::{Context, Result};
use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use folio::analytics::{Analytics, SystemClock};
use folio::api;
use folio::auth::AuthService;
use folio::config::{Config, CorsConfig, DatabaseBackend};
use folio::storage::{PostgresStorage, SqliteStorage, ViewStore};

fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match &config.allow_origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .with_context(|| format!("CORS_ALLOW_ORIGIN '{origin}' is not a valid header value"))?;
            Ok(layer.allow_origin(origin))
        }
        None => Ok(layer.allow_origin(Any)),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("folio=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn ViewStore> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await.context("failed to initialize schema")?;
    info!("Database initialized successfully");

    let settings = config.analytics_settings()?;
    info!(
        "Server timezone offset: {}s, dedup window: {}s",
        settings.zone.offset_secs(),
        settings.dedup_window.as_secs()
    );

    let (analytics, coordinator) = Analytics::new(storage, &settings, Arc::new(SystemClock));

    let auth_service = Arc::new(AuthService::new(config.analytics.api_key.clone()));
    if auth_service.is_enabled() {
        info!("🔐 Write-only analytics endpoints require X-API-Key");
    } else {
        info!("🔓 No analytics API key set - tracking endpoints are open");
    }

    let router = api::create_api_router(analytics, auth_service, config.websocket.clone())
        .layer(cors_layer(&config.cors)?)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 API server listening on http://{}", addr);
    info!("   - Live view counts at ws://{}/ws/analytics", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Upgraded sockets may still hold broadcaster handles
    coordinator.abort();
    info!("Server stopped");

    Ok(())
}
