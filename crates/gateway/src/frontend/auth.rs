//! Single authorization boundary hook (spec §1 Non-goals: "full OAuth/OIDC
//! is out of scope... an injectable auth hook is provided"). `dev` mode
//! admits everything; `apikey` mode checks a static bearer token.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::AuthMode;
use crate::frontend::AppState;

pub async fn require_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let auth = state.engine.config().auth.clone();
    if auth.mode == AuthMode::Dev {
        return next.run(req).await;
    }

    let Some(expected) = auth.api_key.as_deref() else {
        return unauthorized();
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(req).await,
        _ => unauthorized(),
    }
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(Body::from("unauthorized"))
        .expect("static response always builds")
}
