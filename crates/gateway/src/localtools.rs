//! Built-in meta-tools registered directly on the Registry rather than
//! sourced from an upstream (SPEC_FULL §4.10). Reserved names win over any
//! upstream tool carrying the same namespaced id.

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use goblin_pool::Pool;
use serde_json::{Value, json};

use crate::error::GatewayResult;
use crate::protocol::ToolDefinition;
use crate::registry::Registry;
use crate::transport::UpstreamTransport;

pub const PING_TOOL: &str = "goblin_ping";
pub const LIST_UPSTREAMS_TOOL: &str = "goblin_list_upstreams";

/// Registers `goblin_ping` and `goblin_list_upstreams` on `registry`. Called
/// once at engine startup, before any upstream sync runs, so the reserved
/// names are already present to reject colliding upstream tools.
pub fn register(registry: &Arc<Registry>, pool: Arc<Pool<UpstreamTransport>>) {
    let started_at = Instant::now();
    registry.register_local_tool(
        PING_TOOL,
        ToolDefinition {
            name: PING_TOOL.to_string(),
            description: Some("Liveness check for the gateway process itself.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        Arc::new(move |_args: Value| ping(started_at).boxed()),
    );

    registry.register_local_tool(
        LIST_UPSTREAMS_TOOL,
        ToolDefinition {
            name: LIST_UPSTREAMS_TOOL.to_string(),
            description: Some("Lists configured upstreams and their health snapshot.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        Arc::new(move |_args: Value| {
            let pool = pool.clone();
            async move { list_upstreams(&pool).await }.boxed()
        }),
    );
}

async fn ping(started_at: Instant) -> GatewayResult<Value> {
    Ok(json!({ "status": "ok", "uptimeSecs": started_at.elapsed().as_secs() }))
}

async fn list_upstreams(pool: &Pool<UpstreamTransport>) -> GatewayResult<Value> {
    let snapshot = pool.health_snapshot();
    let upstreams: Vec<Value> = snapshot
        .iter()
        .map(|h| {
            json!({
                "name": h.name.as_str(),
                "connected": h.connected,
                "inflight": h.inflight,
                "circuit": format!("{:?}", h.circuit),
            })
        })
        .collect();
    Ok(json!({ "upstreams": upstreams }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;

    #[tokio::test]
    async fn ping_reports_ok_without_touching_the_pool() {
        let registry = Arc::new(Registry::new(Hub::new()));
        let pool = Arc::new(Pool::<UpstreamTransport>::new());
        register(&registry, pool);

        let tool = registry.local_tool(PING_TOOL).expect("ping registered");
        let result = (tool.executor)(Value::Null).await.expect("ping succeeds");
        assert_eq!(result["status"], "ok");
        assert!(result["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn list_upstreams_reports_empty_pool() {
        let registry = Arc::new(Registry::new(Hub::new()));
        let pool = Arc::new(Pool::<UpstreamTransport>::new());
        register(&registry, pool);

        let tool = registry
            .local_tool(LIST_UPSTREAMS_TOOL)
            .expect("list_upstreams registered");
        let result = (tool.executor)(Value::Null).await.expect("call succeeds");
        assert_eq!(result["upstreams"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn reserved_names_appear_in_tool_listing() {
        let registry = Arc::new(Registry::new(Hub::new()));
        let pool = Arc::new(Pool::<UpstreamTransport>::new());
        register(&registry, pool);

        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&PING_TOOL.to_string()));
        assert!(names.contains(&LIST_UPSTREAMS_TOOL.to_string()));
    }
}
