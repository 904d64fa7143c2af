//! The HTTP surface: auth endpoints, health, the WebSocket upgrade and the
//! static file fallback.

use crate::{AppState, auth, connection, now_ms};
use axum::Json;
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tower_http::services::{ServeDir, ServeFile};

/// Builds the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/api/health", get(health))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .fallback_service(
            ServeDir::new("public").not_found_service(ServeFile::new("public/index.html")),
        )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: u64,
    connections: usize,
    authenticated: usize,
}

/// `GET /api/health`.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now_ms(),
        connections: state.metrics.connections.load(Ordering::Relaxed),
        authenticated: state.metrics.authenticated.load(Ordering::Relaxed),
    })
}

/// `GET /ws`: upgrades and hands the socket to the connection task.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::serve(socket, state))
}
