//! Cross-module scenarios from spec §8: aggregation & routing to local
//! tools, collision-free resource namespacing, and subscription fan-out
//! through the Hub — all without a live upstream transport.

use std::sync::Arc;

use goblin_gateway::config::PoliciesSection;
use goblin_gateway::hub::{Category, GatewayEvent, Hub};
use goblin_gateway::metrics::Metrics;
use goblin_gateway::protocol::{ClientMessage, JsonRpcRequest, RequestId, ResourceDefinition};
use goblin_gateway::registry::{Registry, UpstreamSync};
use goblin_gateway::router::Router;
use goblin_gateway::session::{Outbound, Session, SessionState};
use goblin_gateway::subscription::SubscriptionManager;
use goblin_gateway::transport::UpstreamTransport;
use goblin_pool::Pool;

fn new_session(registry: Arc<Registry>, hub: Hub) -> Arc<Session> {
    let pool = Arc::new(Pool::<UpstreamTransport>::new());
    let metrics = Arc::new(Metrics::new());
    let router = Arc::new(Router::new(registry.clone(), pool, metrics));
    let subscriptions = Arc::new(SubscriptionManager::new());
    Arc::new(Session::new(
        goblin_core::prelude::Strng::from("s1"),
        registry,
        router,
        subscriptions,
        hub,
        PoliciesSection::default(),
    ))
}

fn request(id: i64, method: &str, params: serde_json::Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: RequestId::Number(id),
        method: method.to_string(),
        params,
    }
}

/// Drives a session through the full `initialize` / `notifications/initialized`
/// handshake so it reaches `Ready` (spec §4.6).
async fn initialize_session(session: &Arc<Session>) {
    session
        .handle(ClientMessage::Request(request(1, "initialize", serde_json::Value::Null)))
        .await;
    session
        .handle(ClientMessage::Notification(goblin_gateway::protocol::JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/initialized".to_string(),
            params: serde_json::Value::Null,
        }))
        .await;
}

#[tokio::test]
async fn session_lifecycle_lists_aggregated_resources_and_resolves_collisions() {
    let hub = Hub::new();
    let registry = Arc::new(Registry::new(hub.clone()));

    registry.sync_upstream(
        "alpha",
        UpstreamSync {
            tools: None,
            prompts: None,
            resources: Some(vec![ResourceDefinition {
                uri: "file:///shared.txt".to_string(),
                name: "shared".to_string(),
                description: None,
                mime_type: None,
            }]),
            templates: None,
        },
    );
    registry.sync_upstream(
        "beta",
        UpstreamSync {
            tools: None,
            prompts: None,
            resources: Some(vec![ResourceDefinition {
                uri: "file:///shared.txt".to_string(),
                name: "shared".to_string(),
                description: None,
                mime_type: None,
            }]),
            templates: None,
        },
    );

    let session = new_session(registry.clone(), hub);

    initialize_session(&session).await;
    assert_eq!(session.state(), SessionState::Ready);

    let listed = session
        .handle(ClientMessage::Request(request(2, "resources/list", serde_json::Value::Null)))
        .await;
    let Outbound::Response(resp) = listed else {
        panic!("expected a response");
    };
    let uris: Vec<&str> = resp.result["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap())
        .collect();
    assert_eq!(uris.len(), 2);
    assert!(uris.iter().all(|u| u.starts_with("mcp://")));
    assert_ne!(uris[0], uris[1], "same raw uri from two upstreams must not collide");
}

#[tokio::test]
async fn subscribing_a_session_then_publishing_a_resource_update_reaches_it() {
    let hub = Hub::new();
    let registry = Arc::new(Registry::new(hub.clone()));
    registry.sync_upstream(
        "alpha",
        UpstreamSync {
            tools: None,
            prompts: None,
            resources: Some(vec![ResourceDefinition {
                uri: "file:///watched.txt".to_string(),
                name: "watched".to_string(),
                description: None,
                mime_type: None,
            }]),
            templates: None,
        },
    );

    let session = new_session(registry.clone(), hub.clone());
    initialize_session(&session).await;

    let namespaced = goblin_gateway::registry::Registry::namespace_uri("alpha", "file:///watched.txt");
    let mut events = session.spawn_event_forwarder();

    let subscribed = session
        .handle(ClientMessage::Request(request(
            2,
            "resources/subscribe",
            serde_json::json!({ "uri": namespaced.as_str() }),
        )))
        .await;
    assert!(matches!(subscribed, Outbound::Response(_)));

    hub.publish(GatewayEvent::ResourceUpdated {
        upstream: goblin_core::prelude::Strng::from("alpha"),
        namespaced_uri: namespaced.clone(),
    });

    let note = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
        .await
        .expect("notification arrives before the timeout")
        .expect("forwarder channel stays open");
    assert_eq!(note.method, "notifications/resources/updated");
    assert_eq!(note.params["uri"], namespaced.as_str());
}

#[tokio::test]
async fn list_changed_event_is_published_once_per_changed_category_only() {
    let hub = Hub::new();
    let mut events = hub.subscribe();
    let registry = Registry::new(hub);

    registry.sync_upstream(
        "alpha",
        UpstreamSync {
            tools: None,
            prompts: Some(vec![]),
            resources: None,
            templates: None,
        },
    );

    let only = events.recv().await.unwrap();
    assert!(matches!(
        only,
        GatewayEvent::ListChanged { category: Category::Prompts, upstream: Some(_) }
    ));
    assert!(events.try_recv().is_err(), "no spurious tools event for a prompts-only sync");
}
