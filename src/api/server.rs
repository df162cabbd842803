//! HTTP server for the coordination API and monitoring endpoints
//!
//! Table operations, history management, health probes and the Prometheus
//! scrape endpoint are served from one Axum router.

use crate::api::handlers;
use crate::service::coordination::CoordinationService;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "table-coordinator";

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    service: CoordinationService,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, service: CoordinationService) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            service,
            shutdown_tx,
        }
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid API server address")?;

        let app = router(self.service.clone());
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;

        info!("API server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API server shutdown signal received");
            })
            .await?;

        info!("API server stopped");
        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping API server...");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to API server: {}", e);
        }
    }
}

/// Build the full router over a coordination service
pub fn router(service: CoordinationService) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/tables", get(handlers::list_tables))
        .route("/tables/{name}", get(handlers::get_table))
        .route("/tables/{name}/queue", get(handlers::get_queue))
        .route("/tables/{name}/estimate", get(handlers::get_estimate))
        .route("/tables/{name}/enqueue", post(handlers::enqueue))
        .route("/tables/{name}/dequeue", post(handlers::dequeue))
        .route("/tables/{name}/swap", post(handlers::swap))
        .route("/tables/{name}/start", post(handlers::start_service))
        .route("/tables/{name}/finish", post(handlers::finish_service))
        .route("/tables/{name}/pause", post(handlers::pause_service))
        .route("/tables/{name}/calling", post(handlers::switch_to_calling))
        .route("/tables/{name}/idle", post(handlers::switch_to_idle))
        .route("/tables/{name}/skip", post(handlers::skip_to_next))
        .route("/tables/{name}/call", post(handlers::call_entity))
        .route("/unavailable", get(handlers::unavailable))
        .route("/history/add", post(handlers::history_add))
        .route("/history/delete", post(handlers::history_delete))
        .route("/history/query", post(handlers::history_query))
        .with_state(service)
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/metrics",
            "/stats",
            "/tables",
            "/unavailable",
            "/history/query"
        ]
    }))
}

async fn health_handler(State(service): State<CoordinationService>) -> impl IntoResponse {
    debug!("Health check requested");

    let status = HealthCheck::liveness_check(&service)
        .await
        .unwrap_or(HealthStatus::Unhealthy);
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn ready_handler(State(service): State<CoordinationService>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match HealthCheck::readiness_check(&service).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
        }
    }
}

async fn metrics_handler(State(service): State<CoordinationService>) -> Response {
    match service.metrics().encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Health summary plus per-table duration statistics
async fn stats_handler(State(service): State<CoordinationService>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    let health = HealthCheck::check(&service).await;
    let tables = service.read(|c| c.table_stats()).await;

    match (health, tables) {
        (Ok(health), Ok(tables)) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": health.status,
                    "uptime_seconds": health.stats.uptime_seconds,
                },
                "summary": health.stats,
                "tables": tables,
                "components": health.checks,
                "timestamp": chrono::Utc::now()
            })),
        ),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": SERVICE_NAME, "status": "error" },
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
        }
    }
}
