//! HTTP route handlers.
//!
//! All handlers are thin - they read from the registry and the connection
//! manager and never mutate discovery state.

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::SERVICE_ID;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.trusted_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// CORS restricted to the configured origins; any origin when none are set.
fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let allow_origin = if trusted_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let trusted = trusted_origins.to_vec();
        log::info!("[Server] CORS trusted origins: {:?}", trusted);
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin = origin.to_str().unwrap_or("");
            trusted.iter().any(|allowed| origin.starts_with(allowed))
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe with discovery and connection counts.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "version": env!("CARGO_PKG_VERSION"),
        "devices": state.registry.len(),
        "connections": state.ws_manager.connection_count(),
        "eventsPublished": state.dispatcher.published_count(),
        "discovery": state.discovery_running(),
        "uptimeSecs": state.uptime().as_secs(),
    }))
}

/// Current snapshot of live devices, sorted by device id.
async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "devices": state.registry.snapshot() }))
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BridgeResult<impl IntoResponse> {
    state
        .registry
        .get(&id)
        .map(|device| Json(json!({ "device": device })))
        .ok_or(BridgeError::DeviceNotFound(id))
}
