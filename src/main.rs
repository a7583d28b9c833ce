//! relief-broker server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints and the
//! background lifecycle sweeper.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relief_broker::api;
use relief_broker::app_state::AppState;
use relief_broker::config::{BrokerConfig, LogFormat};
use relief_broker::persistence::{
    EntityStore, FileStorage, LocalFileStorage, MemoryStore, PostgresStore,
};
use relief_broker::service::{LifecycleSweeper, SystemClock};
use relief_broker::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = BrokerConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting relief-broker");

    // Build persistence layer
    let store: Arc<dyn EntityStore> = if config.persistence_enabled {
        Arc::new(PostgresStore::connect(&config).await?)
    } else {
        tracing::warn!("persistence disabled, state is kept in memory only");
        Arc::new(MemoryStore::new())
    };
    let files: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(
        config.upload_dir.clone(),
        config.public_file_base_url.clone(),
    ));

    // Build service layer
    let app_state = AppState::new(&config, Arc::clone(&store), files);
    let sweeper =
        LifecycleSweeper::new(store, Arc::new(SystemClock)).spawn(config.sweep_interval());

    // Build router
    let mut app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler));
    if config.public_file_base_url.starts_with('/') {
        app = app.nest_service(
            &config.public_file_base_url,
            ServeDir::new(&config.upload_dir),
        );
    }
    #[cfg(feature = "swagger-ui")]
    {
        use utoipa::OpenApi;
        app = app.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        );
    }
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await;
    tracing::info!("relief-broker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
