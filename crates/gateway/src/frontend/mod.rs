//! axum-based HTTP front-end: mounts the Streamable-HTTP `/mcp` endpoint and
//! the control surface (`/health`, `/status`, `/tools`, `/servers`,
//! `/metrics`, `/shutdown`) behind the configured auth mode (spec §6).

mod auth;
mod control;
mod streamable_http;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub use streamable_http::{SessionTable, spawn_idle_eviction};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionTable>,
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let config = engine.config();
    let sessions = Arc::new(SessionTable::new(
        config.streamable_http.max_sessions,
        Duration::from_millis(config.streamable_http.session_timeout_ms),
    ));
    spawn_idle_eviction(sessions.clone());

    let state = AppState { engine, sessions };

    let guarded = Router::new()
        .route("/mcp", post(streamable_http::handle_mcp))
        .route("/status", get(control::status))
        .route("/tools", get(control::tools))
        .route("/servers", get(control::servers))
        .route("/metrics", get(control::metrics))
        .route("/shutdown", post(control::shutdown))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        .route("/health", get(control::health))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
