//! Transport abstraction (spec §4.1): one capability set, four kinds.
//!
//! `UpstreamTransport` implements `goblin_pool::Connectable` so it can be
//! dropped straight into a `Pool<UpstreamTransport>`. Each variant owns its
//! own connection handle; the pool never reaches inside.

mod http;
mod sse;
mod stdio;
mod streamable_http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use goblin_pool::Connectable;
use tracing::debug;

use crate::config::{ServerConfig, TransportSpec};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

/// Everything the Router needs from a live upstream connection.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn call(&self, req: JsonRpcRequest, timeout: Duration) -> GatewayResult<JsonRpcResponse>;
    async fn notify(&self, note: JsonRpcNotification) -> GatewayResult<()>;
    async fn ping(&self) -> bool;
}

#[derive(Debug)]
pub enum UpstreamTransport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    Sse(SseTransport),
    StreamableHttp(StreamableHttpTransport),
}

impl UpstreamTransport {
    pub fn client(&self) -> &dyn TransportClient {
        match self {
            UpstreamTransport::Stdio(t) => t,
            UpstreamTransport::Http(t) => t,
            UpstreamTransport::Sse(t) => t,
            UpstreamTransport::StreamableHttp(t) => t,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        match self {
            UpstreamTransport::StreamableHttp(t) => t.session_id(),
            _ => None,
        }
    }
}

#[async_trait]
impl Connectable for UpstreamTransport {
    type Config = Arc<ServerConfig>;

    async fn connect(name: &str, config: &Self::Config) -> Result<Self, Arc<str>> {
        debug!(upstream = name, "connecting transport");
        match &config.transport {
            TransportSpec::Stdio { command, args, env } => {
                StdioTransport::spawn(name, command, args, env)
                    .await
                    .map(UpstreamTransport::Stdio)
                    .map_err(|e| Arc::from(e.to_string()))
            }
            TransportSpec::Http { url, headers } => {
                HttpTransport::new(url, headers)
                    .map(UpstreamTransport::Http)
                    .map_err(|e| Arc::from(e.to_string()))
            }
            TransportSpec::Sse { url, headers } => SseTransport::connect(name, url, headers)
                .await
                .map(UpstreamTransport::Sse)
                .map_err(|e| Arc::from(e.to_string())),
            TransportSpec::StreamableHttp { url, headers } => {
                StreamableHttpTransport::new(url, headers, config.reconnect.clone())
                    .map(UpstreamTransport::StreamableHttp)
                    .map_err(|e| Arc::from(e.to_string()))
            }
        }
    }

    async fn close(&self) {
        match self {
            UpstreamTransport::Stdio(t) => t.close().await,
            UpstreamTransport::Http(_) => {}
            UpstreamTransport::Sse(t) => t.close().await,
            UpstreamTransport::StreamableHttp(t) => t.close().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            UpstreamTransport::Stdio(t) => t.is_connected(),
            UpstreamTransport::Http(_) => true,
            UpstreamTransport::Sse(t) => t.is_connected(),
            UpstreamTransport::StreamableHttp(t) => t.is_connected(),
        }
    }
}

pub(crate) fn map_reqwest_err(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::RequestTimeout(Duration::from_secs(0))
    } else {
        GatewayError::ConnectionError("http".to_string(), e.to_string())
    }
}
