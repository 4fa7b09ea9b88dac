//! Exercises the axum front-end end-to-end through `tower::ServiceExt::oneshot`
//! (no real socket bind), covering the auth boundary described in spec §6.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use goblin_gateway::Engine;
use goblin_gateway::config::{AuthMode, Config};
use tower::ServiceExt;

fn dev_config() -> Config {
    Config::default()
}

fn apikey_config(key: &str) -> Config {
    let mut config = Config::default();
    config.auth.mode = AuthMode::Apikey;
    config.auth.api_key = Some(key.to_string());
    config
}

#[tokio::test]
async fn health_is_reachable_without_auth_in_apikey_mode() {
    let engine = Engine::new(apikey_config("topsecret"));
    let app = goblin_gateway::frontend::build_router(engine);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_requires_a_bearer_token_in_apikey_mode() {
    let engine = Engine::new(apikey_config("topsecret"));
    let app = goblin_gateway::frontend::build_router(engine);

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_succeeds_with_the_configured_bearer_token() {
    let engine = Engine::new(apikey_config("topsecret"));
    let app = goblin_gateway::frontend::build_router(engine);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/status")
                .header("authorization", "Bearer topsecret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dev_mode_admits_status_without_any_auth_header() {
    let engine = Engine::new(dev_config());
    let app = goblin_gateway::frontend::build_router(engine);

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tools_endpoint_lists_the_reserved_local_tools() {
    let engine = Engine::new(dev_config());
    let app = goblin_gateway::frontend::build_router(engine);

    let response = app
        .oneshot(Request::builder().uri("/tools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"goblin_ping"));
    assert!(names.contains(&"goblin_list_upstreams"));
}
