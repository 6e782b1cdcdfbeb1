//! Plantfeed Server - Main entry point

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use plantfeed_common::logging::{init_logging, LogConfig};
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::{error, info};

use plantfeed_server::{
    config::Config,
    features,
    ingest::{IngestConfig, IngestScheduler, IngestService},
    middleware,
};

/// Application state for the top-level routes
#[derive(Clone)]
struct AppState {
    db: sqlx::PgPool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("plantfeed-server")
        .filter_directives("plantfeed_server=debug,tower_http=debug,sqlx=info,suppaftp=info")
        .build()
        .overlay_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting plantfeed server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = config.database.connect().await?;
    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    let ingest_config = IngestConfig::from_env()?;
    let service = IngestService::postgres(db_pool.clone(), &ingest_config);

    let scheduler_handles = if ingest_config.enabled {
        info!("Ingestion is enabled, starting scheduler");
        IngestScheduler::new(service.clone(), ingest_config.clone()).start()
    } else {
        info!("Ingestion is disabled (INGEST_ENABLED=false)");
        Vec::new()
    };

    let app = create_router(AppState { db: db_pool }, service, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    for handle in scheduler_handles {
        handle.abort();
    }
    info!("Server shut down gracefully");

    Ok(())
}

fn create_router(state: AppState, service: IngestService, config: &Config) -> Router {
    let feature_routes = features::router(features::FeatureState { ingest: service });

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health_check(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected" })),
        )
            .into_response(),
        Err(e) => {
            error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "database": "disconnected" })),
            )
                .into_response()
        },
    }
}

async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
