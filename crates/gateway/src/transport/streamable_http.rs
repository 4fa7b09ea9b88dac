//! Streamable-HTTP client transport: `POST /mcp` with a protocol-version
//! header and an optional `mcp-session-id`; the first call establishes a
//! session, subsequent calls reuse it. Applies an exponential-backoff
//! reconnect policy on transport error (spec §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::config::ReconnectPolicy;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::transport::{TransportClient, map_reqwest_err};

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

#[derive(Debug)]
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    session_id: RwLock<Option<String>>,
    connected: AtomicBool,
    reconnect: ReconnectPolicy,
}

impl StreamableHttpTransport {
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        reconnect: ReconnectPolicy,
    ) -> anyhow::Result<Self> {
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            header_map.insert(HeaderName::try_from(k.as_str())?, HeaderValue::try_from(v.as_str())?);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            session_id: RwLock::new(None),
            connected: AtomicBool::new(true),
            reconnect,
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    fn build_request(&self, body: &[u8]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header(PROTOCOL_HEADER, SUPPORTED_PROTOCOL_VERSIONS[0])
            .body(body.to_vec());
        if let Some(sid) = self.session_id.read().clone() {
            builder = builder.header(SESSION_HEADER, sid);
        }
        builder
    }

    async fn send_once(&self, body: &[u8], timeout: Duration) -> GatewayResult<reqwest::Response> {
        let resp = self
            .build_request(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if let Some(sid) = resp.headers().get(SESSION_HEADER) {
            if let Ok(sid) = sid.to_str() {
                *self.session_id.write() = Some(sid.to_string());
            }
        }
        if !resp.status().is_success() {
            return Err(GatewayError::ConnectionError(
                "streamablehttp".to_string(),
                format!("upstream returned {}", resp.status()),
            ));
        }
        Ok(resp)
    }

    async fn send_with_reconnect(
        &self,
        body: &[u8],
        timeout: Duration,
    ) -> GatewayResult<reqwest::Response> {
        if !self.reconnect.enabled {
            return self.send_once(body, timeout).await;
        }

        let mut delay = Duration::from_millis(self.reconnect.delay_ms);
        let mut attempt = 0;
        loop {
            match self.send_once(body, timeout).await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt >= self.reconnect.max_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(
                        attempt,
                        error = %e,
                        "streamable-http request failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.reconnect.backoff_multiplier);
                }
            }
        }
    }
}

#[async_trait]
impl TransportClient for StreamableHttpTransport {
    async fn call(&self, req: JsonRpcRequest, timeout: Duration) -> GatewayResult<JsonRpcResponse> {
        let body = serde_json::to_vec(&req).map_err(|e| GatewayError::Internal(e.to_string()))?;
        let resp = self.send_with_reconnect(&body, timeout).await?;
        debug!(method = %req.method, "streamable-http upstream call completed");
        resp.json().await.map_err(map_reqwest_err)
    }

    async fn notify(&self, note: JsonRpcNotification) -> GatewayResult<()> {
        let body = serde_json::to_vec(&note).map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.send_with_reconnect(&body, Duration::from_secs(10))
            .await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.is_connected()
    }
}
