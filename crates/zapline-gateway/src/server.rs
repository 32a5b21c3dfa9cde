//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use zapline_core::config::ZaplineConfig;
use zapline_core::transport::Transport;
use zapline_engine::BulkCoordinator;
use zapline_store::ScheduleStore;

/// Shared state for the gateway server.
pub struct AppState {
    pub store: Arc<ScheduleStore>,
    pub transport: Arc<dyn Transport>,
    pub bulk: BulkCoordinator,
    pub config: ZaplineConfig,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        store: Arc<ScheduleStore>,
        transport: Arc<dyn Transport>,
        config: ZaplineConfig,
    ) -> Self {
        let bulk = BulkCoordinator::new(store.clone(), transport.clone(), &config);
        Self {
            store,
            transport,
            bulk,
            config,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/schedule", post(super::routes::create_schedule))
        .route("/api/v1/schedule", get(super::routes::list_schedules))
        .route("/api/v1/schedule/stats", get(super::routes::schedule_stats))
        .route("/api/v1/schedule/{id}", get(super::routes::get_schedule))
        .route(
            "/api/v1/schedule/{id}",
            delete(super::routes::delete_schedule),
        )
        .route("/api/v1/bulk-send", post(super::routes::bulk_send))
        .route("/api/v1/send", post(super::routes::send_now))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.gateway.host, state.config.gateway.port
    );
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, router).await
}
