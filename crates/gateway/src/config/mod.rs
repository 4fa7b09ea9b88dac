//! Configuration file model, loading/validation, and the diff applied on hot
//! reload (spec §4.8, §6 "Configuration file").

mod watch;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use goblin_core::prelude::Strng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use watch::{ConfigWatcher, ReloadSignal};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleMode {
    #[default]
    Stateful,
    Smart,
    Stateless,
}

impl From<LifecycleMode> for goblin_pool::LifecycleMode {
    fn from(m: LifecycleMode) -> Self {
        match m {
            LifecycleMode::Stateful => goblin_pool::LifecycleMode::Stateful,
            LifecycleMode::Smart => goblin_pool::LifecycleMode::Smart,
            LifecycleMode::Stateless => goblin_pool::LifecycleMode::Stateless,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReconnectPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportSpec {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    #[serde(rename = "streamablehttp")]
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportSpec::Stdio { .. } => "stdio",
            TransportSpec::Http { .. } => "http",
            TransportSpec::Sse { .. } => "sse",
            TransportSpec::StreamableHttp { .. } => "streamablehttp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportSpec,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: LifecycleMode,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayTransport {
    #[default]
    Http,
    Sse,
    Stdio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: GatewayTransport,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: GatewayTransport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Dev,
    Apikey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AuthSection {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(rename = "apiKey", default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoliciesSection {
    #[serde(rename = "defaultTimeout", default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(rename = "outputSizeLimit", default = "default_output_size_limit")]
    pub output_size_limit: usize,
    #[serde(rename = "maxConnections", default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_output_size_limit() -> usize {
    10 * 1024 * 1024
}
fn default_max_connections() -> usize {
    1000
}

impl PoliciesSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamableHttpSection {
    #[serde(rename = "sessionTimeout", default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(rename = "maxSessions", default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_session_timeout_ms() -> u64 {
    300_000
}
fn default_max_sessions() -> usize {
    1000
}

impl Default for StreamableHttpSection {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub policies: PoliciesSection,
    #[serde(rename = "streamableHttp", default)]
    pub streamable_http: StreamableHttpSection,
}

impl Default for PoliciesSection {
    fn default() -> Self {
        PoliciesSection {
            default_timeout_ms: default_timeout_ms(),
            output_size_limit: default_output_size_limit(),
            max_connections: default_max_connections(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let mut cfg: Config = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Highest-precedence environment overrides, per spec §6.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("GOBLIN_PORT") {
            if let Ok(port) = port.parse() {
                self.gateway.port = port;
            }
        }
        if let Ok(host) = std::env::var("GOBLIN_HOST") {
            self.gateway.host = host;
        }
        if let Ok(mode) = std::env::var("GOBLIN_AUTH_MODE") {
            self.auth.mode = match mode.as_str() {
                "apikey" => AuthMode::Apikey,
                _ => AuthMode::Dev,
            };
        }
        if let Ok(key) = std::env::var("GOBLIN_AUTH_APIKEY") {
            self.auth.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for s in &self.servers {
            if s.name.is_empty() {
                return Err(ConfigError::Invalid("server name must not be empty".into()));
            }
            if !seen.insert(s.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server name: {}",
                    s.name
                )));
            }
        }
        if self.auth.mode == AuthMode::Apikey && self.auth.api_key.is_none() {
            return Err(ConfigError::Invalid(
                "auth.apiKey is required when auth.mode is \"apikey\"".into(),
            ));
        }
        Ok(())
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    pub fn server_map(&self) -> HashMap<Strng, ServerConfig> {
        self
            .enabled_servers()
            .map(|s| (Strng::from(s.name.as_str()), s.clone()))
            .collect()
    }
}

/// Named sections of a config diff that rewire in place rather than going
/// through the pool (spec §4.8 step 4).
#[derive(Debug, Clone, Default)]
pub struct OtherChanges {
    pub auth_changed: bool,
    pub policies_changed: bool,
    pub streamable_http_changed: bool,
}

#[derive(Debug, Default)]
pub struct ConfigDiff {
    pub servers: goblin_pool::ConfigDiff<ServerConfig>,
    pub other: OtherChanges,
}

pub fn diff(old: &Config, new: &Config) -> ConfigDiff {
    let servers = goblin_pool::diff_configs(&old.server_map(), &new.server_map());
    let other = OtherChanges {
        auth_changed: old.auth != new.auth,
        policies_changed: old.policies != new.policies,
        streamable_http_changed: old.streamable_http != new.streamable_http,
    };
    ConfigDiff { servers, other }
}
