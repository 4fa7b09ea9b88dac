//! Stateless HTTP transport: every call is an independent POST, no session.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{TransportClient, map_reqwest_err};

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>) -> anyhow::Result<Self> {
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            header_map.insert(HeaderName::try_from(k.as_str())?, HeaderValue::try_from(v.as_str())?);
        }
        let client = reqwest::Client::builder().default_headers(header_map).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    async fn call(&self, req: JsonRpcRequest, timeout: Duration) -> GatewayResult<JsonRpcResponse> {
        let resp = self
            .client
            .post(&self.url)
            .json(&req)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ConnectionError(
                "http".to_string(),
                format!("upstream returned {}", resp.status()),
            ));
        }
        resp.json().await.map_err(map_reqwest_err)
    }

    async fn notify(&self, note: JsonRpcNotification) -> GatewayResult<()> {
        self
            .client
            .post(&self.url)
            .json(&note)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.client.get(&self.url).send().await.is_ok()
    }
}
