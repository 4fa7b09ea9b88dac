//! Streamable-HTTP front-end: `POST /mcp` carries one client message per
//! request; a `mcp-session-id` response header (minted on `initialize`)
//! threads subsequent requests to the same `Session` (spec §4.5, §6).
//!
//! Session state lives in a capped map with idle eviction, mirroring the
//! upstream-side streamable-http session behaviour but for inbound clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use goblin_core::prelude::Strng;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::frontend::AppState;
use crate::protocol::ClientMessage;
use crate::session::{Outbound, Session};

const SESSION_HEADER: &str = "mcp-session-id";

struct Entry {
    session: Arc<Session>,
    last_activity: Instant,
}

pub struct SessionTable {
    entries: Mutex<HashMap<Strng, Entry>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionTable {
    pub fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_sessions,
            idle_timeout,
        }
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.last_activity = Instant::now();
        Some(entry.session.clone())
    }

    fn insert(&self, session: Arc<Session>) -> Result<(), Response> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_sessions {
            return Err((StatusCode::TOO_MANY_REQUESTS, "Too many concurrent sessions").into_response());
        }
        entries.insert(
            session.id.clone(),
            Entry {
                session,
                last_activity: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn evict_idle(&self) -> Vec<Arc<Session>> {
        let mut entries = self.entries.lock();
        let timeout = self.idle_timeout;
        let mut evicted = Vec::new();
        entries.retain(|_, entry| {
            let stale = entry.last_activity.elapsed() >= timeout;
            if stale {
                evicted.push(entry.session.clone());
            }
            !stale
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

pub fn spawn_idle_eviction(table: Arc<SessionTable>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            for session in table.evict_idle() {
                info!(session = %session.id, "evicting idle streamable-http session");
                session.close();
            }
        }
    });
}

pub async fn handle_mcp(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let AppState { engine, sessions: table } = state;
    let existing_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let message: ClientMessage = match parse_message(&body) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let (session, minted) = match existing_id.as_deref().and_then(|id| table.get(id)) {
        Some(session) => (session, None),
        None => {
            let id = Strng::from(uuid::Uuid::new_v4().to_string());
            let config = engine.config();
            let session = Arc::new(Session::new(
                id.clone(),
                engine.registry.clone(),
                engine.router.clone(),
                engine.subscriptions.clone(),
                engine.hub.clone(),
                config.policies.clone(),
            ));
            if let Err(resp) = table.insert(session.clone()) {
                warn!(capacity = table.len(), "streamable-http session cap reached");
                return resp;
            }
            (session, Some(id))
        }
    };

    let outbound = session.handle(message).await;

    let mut response = match outbound {
        Outbound::Response(resp) => Json(resp).into_response(),
        Outbound::Error(err) => Json(err).into_response(),
        Outbound::Notification(note) => Json(note).into_response(),
        Outbound::None => StatusCode::ACCEPTED.into_response(),
    };

    if let Some(id) = minted {
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

fn parse_message(body: &[u8]) -> Result<ClientMessage, Response> {
    if let Ok(req) = serde_json::from_slice::<crate::protocol::JsonRpcRequest>(body) {
        return Ok(ClientMessage::Request(req));
    }
    if let Ok(note) = serde_json::from_slice::<crate::protocol::JsonRpcNotification>(body) {
        return Ok(ClientMessage::Notification(note));
    }
    Err((StatusCode::BAD_REQUEST, "invalid JSON-RPC message").into_response())
}
