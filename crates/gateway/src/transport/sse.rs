//! Legacy SSE upstream transport: a long-lived `GET` carries server events;
//! client messages are `POST`ed to a server-issued `endpoint` URL (spec
//! §4.1). Deprecated in favor of Streamable-HTTP but still supported for
//! older upstreams.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::{TransportClient, map_reqwest_err};

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

#[derive(Debug)]
pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    connected: Arc<AtomicBool>,
    pending: Pending,
}

impl SseTransport {
    pub async fn connect(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            header_map.insert(HeaderName::try_from(k.as_str())?, HeaderValue::try_from(v.as_str())?);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()?;

        let resp = client.get(url).send().await?;
        let mut stream = resp.bytes_stream();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let mut endpoint_tx = Some(endpoint_tx);
        let base = url.to_string();
        let name = name.to_string();
        let pending_task = pending.clone();
        let connected_task = connected.clone();

        tokio::spawn(async move {
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find("\n\n") {
                    let event = buf[..pos].to_string();
                    buf.drain(..pos + 2);
                    handle_sse_event(&event, &base, &mut endpoint_tx, &pending_task);
                }
            }
            connected_task.store(false, Ordering::Relaxed);
            warn!(upstream = %name, "sse upstream event stream closed");
        });

        let post_url = endpoint_rx
            .await
            .map_err(|_| anyhow::anyhow!("sse upstream never sent an endpoint event"))?;

        Ok(Self {
            client,
            post_url,
            connected,
            pending,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

fn handle_sse_event(
    event: &str,
    base_url: &str,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
    pending: &Pending,
) {
    let mut event_type = "message";
    let mut data = String::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim());
        }
    }
    match event_type {
        "endpoint" => {
            if let Some(tx) = endpoint_tx.take() {
                let resolved = resolve_endpoint(base_url, data.trim());
                let _ = tx.send(resolved);
            }
        }
        _ => {
            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data) {
                if let Some(tx) = pending.lock().remove(&resp.id) {
                    let _ = tx.send(resp);
                }
            }
        }
    }
}

fn resolve_endpoint(base: &str, endpoint: &str) -> String {
    match reqwest::Url::parse(base).and_then(|b| b.join(endpoint)) {
        Ok(u) => u.to_string(),
        Err(_) => endpoint.to_string(),
    }
}

#[async_trait]
impl TransportClient for SseTransport {
    async fn call(&self, req: JsonRpcRequest, timeout: Duration) -> GatewayResult<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(req.id.clone(), tx);

        let resp = self
            .client
            .post(&self.post_url)
            .json(&req)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            self.pending.lock().remove(&req.id);
            return Err(GatewayError::ConnectionError(
                "sse".to_string(),
                format!("upstream returned {}", resp.status()),
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(GatewayError::Cancelled),
            Err(_) => {
                self.pending.lock().remove(&req.id);
                Err(GatewayError::RequestTimeout(timeout))
            }
        }
    }

    async fn notify(&self, note: JsonRpcNotification) -> GatewayResult<()> {
        self
            .client
            .post(&self.post_url)
            .json(&note)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.is_connected()
    }
}
