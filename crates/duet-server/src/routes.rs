//! HTTP surface: health, hello, and broker stats, plus CORS and tracing layers.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Uri},
    routing::get,
};
use duet_broker::{Broker, BrokerStats};
use duet_common::error::{DuetError, DuetResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// State shared by the HTTP routes.
pub struct AppState {
    pub broker: Broker,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct HelloResponse {
    message: &'static str,
}

/// Build the HTTP router. Unknown paths get a JSON 404.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/hello", get(hello))
        .route("/api/stats", get(stats))
        .fallback(not_found)
        .with_state(Arc::new(state))
}

/// CORS restricted to `origin` when one is configured, open otherwise.
pub fn cors_layer(origin: Option<&str>) -> DuetResult<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin {
        Some(origin) => {
            let value = HeaderValue::from_str(origin).map_err(|e| DuetError::Validation {
                message: format!("invalid frontend origin {origin:?}: {e}"),
            })?;
            Ok(cors.allow_origin(value))
        }
        None => Ok(cors.allow_origin(Any)),
    }
}

/// Merge the HTTP routes with the signaling gateway and apply the shared layers.
pub fn app(http: Router, gateway: Router, cors: CorsLayer) -> Router {
    gateway
        .merge(http)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn hello() -> Json<HelloResponse> {
    Json(HelloResponse {
        message: "Hello from the backend!",
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<BrokerStats> {
    Json(state.broker.stats().await)
}

async fn not_found(uri: Uri) -> DuetError {
    DuetError::NotFound {
        resource: format!("Route {}", uri.path()),
    }
}
