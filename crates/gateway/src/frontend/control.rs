//! Operational endpoints: `/health`, `/status`, `/tools`, `/servers`,
//! `/metrics`, `/shutdown` (spec §6 "Control HTTP").

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use goblin_pool::CircuitPhase;
use serde::Deserialize;
use serde_json::json;

use crate::frontend::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.engine.config();
    let snapshot = state.engine.pool.health_snapshot();
    let total = config.servers.len();
    let online = snapshot.iter().filter(|h| h.connected).count();
    let offline = total.saturating_sub(online);
    let health = if total == 0 || offline == 0 {
        "healthy"
    } else if offline < total {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(json!({
        "servers": {
            "total": total,
            "online": online,
            "offline": offline,
        },
        "tools": state.engine.registry.list_tools().len(),
        "uptime": state.engine.uptime().as_secs(),
        "health": health,
        "metrics": state.engine.metrics.status_snapshot(),
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ToolsQuery {
    search: Option<String>,
    server: Option<String>,
}

pub async fn tools(State(state): State<AppState>, Query(q): Query<ToolsQuery>) -> impl IntoResponse {
    let needle = q.search.as_deref().map(str::to_lowercase);
    let tools: Vec<_> = state
        .engine
        .registry
        .list_tools_detailed()
        .into_iter()
        .filter(|(_, server_id)| match &q.server {
            None => true,
            Some(wanted) => server_id.as_deref().map(|s| s == wanted).unwrap_or(false),
        })
        .filter(|(def, _)| match &needle {
            None => true,
            Some(needle) => {
                def.name.to_lowercase().contains(needle.as_str())
                    || def
                        .description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(needle.as_str()))
                        .unwrap_or(false)
            }
        })
        .map(|(def, server_id)| {
            json!({
                "name": def.name,
                "description": def.description,
                "serverId": server_id.map(|s| s.to_string()),
                "inputSchema": def.input_schema,
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ServersQuery {
    status: Option<String>,
}

pub async fn servers(State(state): State<AppState>, Query(q): Query<ServersQuery>) -> impl IntoResponse {
    let config = state.engine.config();
    let snapshot = state.engine.pool.health_snapshot();

    let servers: Vec<_> = config
        .servers
        .iter()
        .map(|server| {
            let health = snapshot.iter().find(|h| h.name.as_str() == server.name);
            let status = match health {
                Some(h) if h.connected => "online",
                Some(h) if h.circuit == CircuitPhase::Open => "circuit_open",
                _ => "offline",
            };
            json!({
                "name": server.name,
                "transport": server.transport.kind(),
                "status": status,
                "enabled": server.enabled,
                "tools": state.engine.registry.tool_count_for_upstream(&server.name),
            })
        })
        .filter(|entry| match &q.status {
            None => true,
            Some(wanted) => entry["status"].as_str() == Some(wanted.as_str()),
        })
        .collect();
    Json(json!({ "servers": servers }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
        state.engine.metrics.encode(),
    )
}

pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.shutdown().await;
    StatusCode::ACCEPTED
}
