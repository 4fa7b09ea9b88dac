//! Dispatches a client `tools/call`, `prompts/get`, or `resources/read` to
//! the right upstream (or a local tool), with per-call timeout and
//! cancellation and a metrics record on every outcome (spec §4.4).

use std::sync::Arc;
use std::time::{Duration, Instant};

use goblin_core::prelude::Strng;
use goblin_pool::Pool;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::PoliciesSection;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::Metrics;
use crate::protocol::{JsonRpcRequest, RequestId};
use crate::registry::Registry;
use crate::transport::UpstreamTransport;

/// Cooperative cancellation token for one in-flight request, correlated by
/// the client's request id (spec §4.4 step 6, §8 "timeout and cancellation").
#[derive(Clone)]
pub struct CancelToken(Arc<Notify>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    pub fn cancel(&self) {
        self.0.notify_waiters();
    }

    async fn cancelled(&self) {
        self.0.notified().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Router {
    registry: Arc<Registry>,
    pool: Arc<Pool<UpstreamTransport>>,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, pool: Arc<Pool<UpstreamTransport>>, metrics: Arc<Metrics>) -> Self {
        Self { registry, pool, metrics }
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        policies: &PoliciesSection,
        cancel: CancelToken,
    ) -> GatewayResult<Value> {
        if let Some(local) = self.registry.local_tool(name) {
            let started = Instant::now();
            let result = (local.executor)(arguments).await;
            self.record("local", name, &result, started);
            return result;
        }

        let entry = self
            .registry
            .get_tool(name)
            .ok_or_else(|| GatewayError::NotFound(format!("tool {name}")))?;

        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::String(uuid::Uuid::new_v4().to_string()),
            method: "tools/call".to_string(),
            params: serde_json::json!({ "name": entry.definition.name, "arguments": arguments }),
        };

        let started = Instant::now();
        let result = self
            .dispatch(&entry.upstream, req, policies.default_timeout(), cancel)
            .await
            .map(|resp| resp.result);
        self.record(entry.upstream.as_str(), name, &result, started);
        result
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
        policies: &PoliciesSection,
        cancel: CancelToken,
    ) -> GatewayResult<Value> {
        let entry = self
            .registry
            .get_prompt(name)
            .ok_or_else(|| GatewayError::NotFound(format!("prompt {name}")))?;

        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::String(uuid::Uuid::new_v4().to_string()),
            method: "prompts/get".to_string(),
            params: serde_json::json!({ "name": entry.definition.name, "arguments": arguments }),
        };

        let started = Instant::now();
        let result = self
            .dispatch(&entry.upstream, req, policies.default_timeout(), cancel)
            .await
            .map(|resp| resp.result);
        self.record(entry.upstream.as_str(), name, &result, started);
        result
    }

    pub async fn read_resource(
        &self,
        namespaced_uri: &str,
        policies: &PoliciesSection,
        cancel: CancelToken,
    ) -> GatewayResult<Value> {
        let (upstream, raw_uri) = self.registry.find_upstream_for_uri(namespaced_uri)?;

        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::String(uuid::Uuid::new_v4().to_string()),
            method: "resources/read".to_string(),
            params: serde_json::json!({ "uri": raw_uri }),
        };

        let started = Instant::now();
        let result = self
            .dispatch(&upstream, req, policies.default_timeout(), cancel)
            .await
            .map(|resp| resp.result);
        self.record(upstream.as_str(), namespaced_uri, &result, started);
        result
    }

    async fn dispatch(
        &self,
        upstream: &Strng,
        req: JsonRpcRequest,
        timeout: Duration,
        cancel: CancelToken,
    ) -> GatewayResult<crate::protocol::JsonRpcResponse> {
        let transport = self.pool.get_transport(upstream.as_str()).await?;

        let call = transport.client().call(req, timeout);
        tokio::pin!(call);

        let outcome = tokio::select! {
            result = &mut call => result,
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        };

        self.pool.release(upstream.as_str()).await;
        outcome
    }

    fn record(&self, upstream: &str, entity: &str, result: &GatewayResult<Value>, started: Instant) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(GatewayError::RequestTimeout(_)) => "timeout",
            Err(GatewayError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        self.metrics
            .record_call(upstream, entity, outcome, started.elapsed().as_secs_f64());
        if outcome == "error" {
            if let Err(e) = result {
                warn!(upstream, entity, error = %e, "routed call failed");
            }
        } else {
            info!(upstream, entity, outcome, "routed call completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoliciesSection;
    use crate::hub::Hub;
    use crate::protocol::ToolDefinition;
    use futures::FutureExt;

    fn router() -> Router {
        let registry = Arc::new(Registry::new(Hub::new()));
        let pool = Arc::new(Pool::<UpstreamTransport>::new());
        let metrics = Arc::new(Metrics::new());
        Router::new(registry, pool, metrics)
    }

    #[tokio::test]
    async fn call_tool_dispatches_to_local_tool_without_a_pool_lookup() {
        let r = router();
        r.registry.register_local_tool(
            "echo",
            ToolDefinition {
                name: "echo".to_string(),
                description: None,
                input_schema: serde_json::json!({}),
            },
            Arc::new(|args| async move { Ok(args) }.boxed()),
        );

        let result = r
            .call_tool(
                "echo",
                serde_json::json!({"x": 1}),
                &PoliciesSection::default(),
                CancelToken::new(),
            )
            .await
            .expect("local tool call succeeds");
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn call_tool_reports_not_found_for_unknown_name() {
        let r = router();
        let err = r
            .call_tool(
                "missing",
                serde_json::Value::Null,
                &PoliciesSection::default(),
                CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_token_wakes_a_pending_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.expect("waiter task completes");
    }
}
