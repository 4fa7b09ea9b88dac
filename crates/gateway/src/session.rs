//! Per-client session state machine: `Created -> Initializing -> Ready ->
//! Closed` (spec §4.5). One `Session` exists per logical MCP client
//! connection regardless of transport; the front-end owns the byte-level
//! framing and hands parsed messages to `Session::handle`.

use std::collections::HashMap;
use std::sync::Arc;

use goblin_core::prelude::Strng;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::PoliciesSection;
use crate::error::{GatewayError, GatewayResult};
use crate::hub::{GatewayEvent, Hub};
use crate::protocol::{
    ClientMessage, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcResponse, RequestId,
    ServerCapabilities, ServerInfo, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::registry::Registry;
use crate::router::{CancelToken, Router};
use crate::subscription::SubscriptionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Ready,
    Closed,
}

/// Outbound traffic a session produces: either a direct reply to a request,
/// or a server-initiated notification (list-changed / resource-updated /
/// cancellation acks) the front-end pushes down the client's stream.
pub enum Outbound {
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
    Notification(JsonRpcNotification),
    None,
}

pub struct Session {
    pub id: Strng,
    state: Mutex<SessionState>,
    inflight: Mutex<HashMap<RequestId, CancelToken>>,
    registry: Arc<Registry>,
    router: Arc<Router>,
    subscriptions: Arc<SubscriptionManager>,
    hub: Hub,
    policies: PoliciesSection,
}

impl Session {
    pub fn new(
        id: Strng,
        registry: Arc<Registry>,
        router: Arc<Router>,
        subscriptions: Arc<SubscriptionManager>,
        hub: Hub,
        policies: PoliciesSection,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Created),
            inflight: Mutex::new(HashMap::new()),
            registry,
            router,
            subscriptions,
            hub,
            policies,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Spawns the background task that forwards `Hub` events relevant to
    /// this session's own subscriptions as outbound notifications. Returns a
    /// receiver the front-end drains to push bytes to the client.
    pub fn spawn_event_forwarder(self: &Arc<Self>) -> tokio::sync::mpsc::UnboundedReceiver<JsonRpcNotification> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut events = self.hub.subscribe();
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(note) = session.translate_event(event) {
                            if tx.send(note).is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session = %session.id, skipped = n, "session event forwarder lagged, dropping events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }

    fn translate_event(&self, event: GatewayEvent) -> Option<JsonRpcNotification> {
        match event {
            GatewayEvent::ListChanged { category, .. } => {
                let method = match category {
                    crate::hub::Category::Tools => "notifications/tools/list_changed",
                    crate::hub::Category::Prompts => "notifications/prompts/list_changed",
                    crate::hub::Category::Resources => "notifications/resources/list_changed",
                    crate::hub::Category::Templates => "notifications/resources/list_changed",
                };
                Some(JsonRpcNotification {
                    jsonrpc: "2.0".to_string(),
                    method: method.to_string(),
                    params: serde_json::Value::Null,
                })
            }
            GatewayEvent::ResourceUpdated { namespaced_uri, .. } => {
                let subscribed = self
                    .subscriptions
                    .subscribers(namespaced_uri.as_str())
                    .iter()
                    .any(|c| c.as_str() == self.id.as_str());
                if !subscribed {
                    return None;
                }
                Some(JsonRpcNotification {
                    jsonrpc: "2.0".to_string(),
                    method: "notifications/resources/updated".to_string(),
                    params: serde_json::json!({ "uri": namespaced_uri.as_str() }),
                })
            }
        }
    }

    pub async fn handle(self: &Arc<Self>, message: ClientMessage) -> Outbound {
        match message {
            ClientMessage::Request(req) => self.handle_request(req).await,
            ClientMessage::Notification(note) => {
                self.handle_notification(note);
                Outbound::None
            }
        }
    }

    async fn handle_request(self: &Arc<Self>, req: crate::protocol::JsonRpcRequest) -> Outbound {
        let id = req.id.clone();
        let result = self.dispatch(&req).await;
        match result {
            Ok(value) => Outbound::Response(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: value,
            }),
            Err(e) => Outbound::Error(JsonRpcErrorResponse::from_gateway_error(id, &e)),
        }
    }

    fn handle_notification(self: &Arc<Self>, note: JsonRpcNotification) {
        match note.method.as_str() {
            "notifications/cancelled" => {
                if let Some(id) = note.params.get("requestId").and_then(request_id_from_value) {
                    if let Some(token) = self.inflight.lock().remove(&id) {
                        token.cancel();
                    }
                }
            }
            "notifications/initialized" => {
                let mut state = self.state.lock();
                if *state == SessionState::Initializing {
                    *state = SessionState::Ready;
                    debug!(session = %self.id, "session ready");
                }
            }
            _ => {}
        }
    }

    async fn dispatch(self: &Arc<Self>, req: &crate::protocol::JsonRpcRequest) -> GatewayResult<serde_json::Value> {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(&req.params),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => {
                self.require_ready()?;
                Ok(serde_json::json!({ "tools": self.registry.list_tools() }))
            }
            "prompts/list" => {
                self.require_ready()?;
                Ok(serde_json::json!({ "prompts": self.registry.list_prompts() }))
            }
            "resources/list" => {
                self.require_ready()?;
                Ok(serde_json::json!({ "resources": self.registry.list_resources() }))
            }
            "resources/templates/list" => {
                self.require_ready()?;
                Ok(serde_json::json!({ "resourceTemplates": self.registry.list_templates() }))
            }
            "tools/call" => {
                self.require_ready()?;
                let name = req
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::InvalidRequest("missing tool name".to_string()))?;
                let arguments = req.params.get("arguments").cloned().unwrap_or(serde_json::Value::Null);
                let cancel = self.register_inflight(req.id.clone());
                let result = self.router.call_tool(name, arguments, &self.policies, cancel).await;
                self.inflight.lock().remove(&req.id);
                result
            }
            "prompts/get" => {
                self.require_ready()?;
                let name = req
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::InvalidRequest("missing prompt name".to_string()))?;
                let arguments = req.params.get("arguments").cloned().unwrap_or(serde_json::Value::Null);
                let cancel = self.register_inflight(req.id.clone());
                let result = self.router.get_prompt(name, arguments, &self.policies, cancel).await;
                self.inflight.lock().remove(&req.id);
                result
            }
            "resources/read" => {
                self.require_ready()?;
                let uri = req
                    .params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::InvalidRequest("missing resource uri".to_string()))?;
                let cancel = self.register_inflight(req.id.clone());
                let result = self.router.read_resource(uri, &self.policies, cancel).await;
                self.inflight.lock().remove(&req.id);
                result
            }
            "resources/subscribe" => {
                self.require_ready()?;
                let uri = req
                    .params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::InvalidRequest("missing resource uri".to_string()))?;
                let (upstream, _) = self.registry.find_upstream_for_uri(uri)?;
                self.subscriptions.subscribe(self.id.as_str(), uri, upstream)?;
                Ok(serde_json::Value::Object(Default::default()))
            }
            "resources/unsubscribe" => {
                self.require_ready()?;
                let uri = req
                    .params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::InvalidRequest("missing resource uri".to_string()))?;
                self.subscriptions.unsubscribe(self.id.as_str(), uri);
                Ok(serde_json::Value::Object(Default::default()))
            }
            other => Err(GatewayError::InvalidRequest(format!("unknown method {other}"))),
        }
    }

    fn handle_initialize(self: &Arc<Self>, params: &serde_json::Value) -> GatewayResult<serde_json::Value> {
        let requested = params.get("protocolVersion").and_then(|v| v.as_str());
        let negotiated = match requested {
            None => SUPPORTED_PROTOCOL_VERSIONS[0],
            Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => v,
            Some(v) => {
                return Err(GatewayError::InvalidParams(format!(
                    "unsupported protocolVersion {v}"
                )));
            }
        };

        let mut state = self.state.lock();
        if *state != SessionState::Created {
            return Err(GatewayError::InvalidRequest(
                "initialize called outside Created state".to_string(),
            ));
        }
        *state = SessionState::Initializing;
        debug!(session = %self.id, "session initializing");
        Ok(serde_json::to_value(InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(crate::protocol::ListChangedCapability { list_changed: true }),
                prompts: Some(crate::protocol::ListChangedCapability { list_changed: true }),
                resources: Some(crate::protocol::ResourcesCapability {
                    list_changed: true,
                    subscribe: true,
                }),
            },
            server_info: ServerInfo {
                name: "goblin".to_string(),
                version: goblin_core::build::BuildInfo::new().version.to_string(),
            },
        })
        .expect("InitializeResult always serializes"))
    }

    fn require_ready(&self) -> GatewayResult<()> {
        if *self.state.lock() != SessionState::Ready {
            return Err(GatewayError::InvalidRequest(
                "session is not initialized".to_string(),
            ));
        }
        Ok(())
    }

    fn register_inflight(&self, id: RequestId) -> CancelToken {
        let token = CancelToken::new();
        self.inflight.lock().insert(id, token.clone());
        token
    }

    pub fn close(&self) {
        *self.state.lock() = SessionState::Closed;
        let tokens: Vec<CancelToken> = self.inflight.lock().drain().map(|(_, t)| t).collect();
        for t in tokens {
            t.cancel();
        }
        let emptied = self.subscriptions.cleanup_client(self.id.as_str());
        if !emptied.is_empty() {
            debug!(session = %self.id, count = emptied.len(), "dropped subscriptions on close");
        }
    }
}

fn request_id_from_value(v: &serde_json::Value) -> Option<RequestId> {
    serde_json::from_value(v.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    fn new_session() -> Arc<Session> {
        let hub = Hub::new();
        let registry = Arc::new(Registry::new(hub.clone()));
        let pool = Arc::new(goblin_pool::Pool::<crate::transport::UpstreamTransport>::new());
        let metrics = Arc::new(Metrics::new());
        let router = Arc::new(Router::new(registry.clone(), pool, metrics));
        let subscriptions = Arc::new(SubscriptionManager::new());
        Arc::new(Session::new(
            Strng::from("session-1"),
            registry,
            router,
            subscriptions,
            hub,
            PoliciesSection::default(),
        ))
    }

    fn request(method: &str, params: serde_json::Value) -> crate::protocol::JsonRpcRequest {
        crate::protocol::JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(1),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_transitions_created_to_initializing_then_ready() {
        let session = new_session();
        assert_eq!(session.state(), SessionState::Created);

        let outbound = session
            .handle(ClientMessage::Request(request("initialize", serde_json::Value::Null)))
            .await;
        assert!(matches!(outbound, Outbound::Response(_)));
        assert_eq!(session.state(), SessionState::Initializing);

        session.handle_notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/initialized".to_string(),
            params: serde_json::Value::Null,
        });
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn initialize_rejects_unsupported_protocol_version() {
        let session = new_session();
        let outbound = session
            .handle(ClientMessage::Request(request(
                "initialize",
                serde_json::json!({"protocolVersion": "1999-01-01"}),
            )))
            .await;
        assert!(matches!(outbound, Outbound::Error(_)));
        assert_eq!(session.state(), SessionState::Created);
    }

    #[tokio::test]
    async fn ping_succeeds_before_initialize() {
        let session = new_session();
        let outbound = session
            .handle(ClientMessage::Request(request("ping", serde_json::Value::Null)))
            .await;
        assert!(matches!(outbound, Outbound::Response(_)));
    }

    #[tokio::test]
    async fn tools_list_before_ready_is_rejected() {
        let session = new_session();
        let outbound = session
            .handle(ClientMessage::Request(request("tools/list", serde_json::Value::Null)))
            .await;
        assert!(matches!(outbound, Outbound::Error(_)));
    }

    #[tokio::test]
    async fn tools_call_before_initialize_is_rejected() {
        let session = new_session();
        let outbound = session
            .handle(ClientMessage::Request(request(
                "tools/call",
                serde_json::json!({"name": "whatever", "arguments": {}}),
            )))
            .await;
        assert!(matches!(outbound, Outbound::Error(_)));
    }

    #[test]
    fn cancelled_notification_removes_the_matching_inflight_token() {
        let session = new_session();
        let _token = session.register_inflight(RequestId::Number(7));
        assert!(!session.inflight.lock().is_empty());

        session.handle_notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/cancelled".to_string(),
            params: serde_json::json!({"requestId": 7}),
        });

        assert!(session.inflight.lock().is_empty());
    }

    #[test]
    fn close_cancels_inflight_and_clears_subscriptions() {
        let session = new_session();
        let _token = session.register_inflight(RequestId::Number(1));
        assert!(!session.inflight.lock().is_empty());

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.inflight.lock().is_empty());
    }
}

#[derive(serde::Serialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
}
