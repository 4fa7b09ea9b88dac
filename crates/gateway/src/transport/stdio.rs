//! Stdio-subprocess transport: array-form argv, never shelled; JSON-RPC
//! framed one object per line over the child's stdin/stdout; stderr piped
//! into the gateway's log stream (spec §4.1).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::TransportClient;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct StdioTransport {
    name: Arc<str>,
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    alive: AtomicBool,
}

impl StdioTransport {
    pub async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let upstream_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(upstream = %upstream_name, "{line}");
            }
        });

        Ok(Self {
            name: Arc::from(name),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Graceful-signal then force-kill termination sequence (spec §4.1).
    pub async fn close(&self) {
        self.alive.store(false, Ordering::Relaxed);
        let mut child = self.child.lock().await;
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    libc_kill(pid as i32, SIGTERM);
                }
            }
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(upstream = %self.name, "graceful shutdown timed out, killing");
                let _ = child.kill().await;
            }
        }
    }

    async fn write_line(&self, line: &str) -> GatewayResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::ConnectionError(self.name.to_string(), e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| GatewayError::ConnectionError(self.name.to_string(), e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| GatewayError::ConnectionError(self.name.to_string(), e.to_string()))
    }

    async fn read_line(&self) -> GatewayResult<String> {
        let mut stdout = self.stdout.lock().await;
        let mut buf = String::new();
        let n = stdout
            .read_line(&mut buf)
            .await
            .map_err(|e| GatewayError::ConnectionError(self.name.to_string(), e.to_string()))?;
        if n == 0 {
            self.alive.store(false, Ordering::Relaxed);
            return Err(GatewayError::ConnectionError(
                self.name.to_string(),
                "upstream closed stdout (EOF)".to_string(),
            ));
        }
        Ok(buf)
    }
}

#[cfg(unix)]
const SIGTERM: i32 = 15;

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    let _ = unsafe { kill(pid, sig) };
}

#[async_trait]
impl TransportClient for StdioTransport {
    async fn call(&self, req: JsonRpcRequest, timeout: Duration) -> GatewayResult<JsonRpcResponse> {
        let line = serde_json::to_string(&req)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.write_line(&line).await?;
        let raw = tokio::time::timeout(timeout, self.read_line())
            .await
            .map_err(|_| GatewayError::RequestTimeout(timeout))??;
        serde_json::from_str(&raw).map_err(|e| GatewayError::Internal(e.to_string()))
    }

    async fn notify(&self, note: JsonRpcNotification) -> GatewayResult<()> {
        let line =
            serde_json::to_string(&note).map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.write_line(&line).await
    }

    async fn ping(&self) -> bool {
        self.is_connected()
    }
}
