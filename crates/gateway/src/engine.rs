//! Top-level wiring: owns every long-lived component and exposes the
//! startup / reload / shutdown entry points the `app` binary drives (spec
//! §4.2 Config Manager, §4.8 hot reload, §6 process lifecycle).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use goblin_core::prelude::Strng;
use goblin_pool::{Pool, PoolConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{Config, ConfigWatcher, ReloadSignal};
use crate::hub::Hub;
use crate::localtools;
use crate::metrics::Metrics;
use crate::registry::{Registry, UpstreamSync};
use crate::router::Router;
use crate::subscription::SubscriptionManager;
use crate::transport::UpstreamTransport;

pub struct Engine {
    config: ArcSwap<Config>,
    pub registry: Arc<Registry>,
    pub pool: Arc<Pool<UpstreamTransport>>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub hub: Hub,
    pub router: Arc<Router>,
    pub metrics: Arc<Metrics>,
    started_at: Instant,
}

impl Engine {
    pub fn new(config: Config) -> Arc<Self> {
        let hub = Hub::new();
        let registry = Arc::new(Registry::new(hub.clone()));
        let pool: Arc<Pool<UpstreamTransport>> = Arc::new(Pool::new());
        let subscriptions = Arc::new(SubscriptionManager::new());
        let metrics = Arc::new(Metrics::new());
        let router = Arc::new(Router::new(registry.clone(), pool.clone(), metrics.clone()));

        localtools::register(&registry, pool.clone());

        let engine = Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            registry,
            pool,
            subscriptions,
            hub,
            router,
            metrics,
            started_at: Instant::now(),
        });
        engine.configure_upstreams_from(&engine.config.load());
        engine
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn configure_upstreams_from(&self, config: &Config) {
        for server in config.enabled_servers() {
            self.pool.configure(
                Strng::from(server.name.as_str()),
                PoolConfig {
                    config: Arc::new(server.clone()),
                    mode: server.mode.into(),
                    idle: Duration::from_secs(300),
                    circuit: Default::default(),
                },
            );
        }
    }

    /// Fetches `*/list` from every enabled upstream and applies the results
    /// to the registry (spec §4.3 initial aggregation, run at startup and
    /// after every upstream (re)connect).
    pub async fn sync_all_upstreams(self: &Arc<Self>) {
        let names = self.pool.upstream_names();
        for name in names {
            self.sync_upstream(&name).await;
        }
    }

    pub async fn sync_upstream(self: &Arc<Self>, name: &str) {
        let transport = match self.pool.get_transport(name).await {
            Ok(t) => t,
            Err(e) => {
                warn!(upstream = name, error = %e, "skipping sync, upstream unavailable");
                return;
            }
        };

        let mut sync = UpstreamSync::default();
        sync.tools = fetch_list(&transport, "tools/list", "tools").await;
        sync.prompts = fetch_list(&transport, "prompts/list", "prompts").await;
        sync.resources = fetch_list(&transport, "resources/list", "resources").await;
        sync.templates = fetch_list(&transport, "resources/templates/list", "resourceTemplates").await;

        self.pool.release(name).await;
        self.registry.sync_upstream(name, sync);
    }

    /// Spawns the periodic idle-eviction sweep for `smart`-mode upstreams
    /// (spec §4.1 lifecycle modes).
    pub fn spawn_idle_eviction(self: &Arc<Self>) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                pool.evict_idle().await;
            }
        });
    }

    /// Watches the config file and applies diffs as they arrive (spec §4.8).
    /// Returns the watcher, which must be kept alive for the duration of the
    /// process.
    pub fn spawn_config_watch(self: &Arc<Self>, path: PathBuf) -> anyhow::Result<ConfigWatcher> {
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = ConfigWatcher::watch(&path, tx)?;

        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                match signal {
                    ReloadSignal::Applied(new_config) => engine.apply_reload(new_config).await,
                    ReloadSignal::Failed(e) => {
                        engine.metrics.config_reload_failures_total.inc();
                        warn!(error = %e, "config reload rejected, keeping previous config");
                    }
                }
            }
        });
        Ok(watcher)
    }

    /// Applies a hot-reloaded config: server-map diff drives pool
    /// add/remove/reconfigure, everything else swaps in place (spec §4.8
    /// steps 1-5).
    pub async fn apply_reload(self: &Arc<Self>, new_config: Config) {
        let old_config = self.config();
        let diff = crate::config::diff(&old_config, &new_config);

        for (name, cfg) in &diff.servers.added {
            self.pool.configure(
                name.clone(),
                PoolConfig {
                    config: Arc::new(cfg.clone()),
                    mode: cfg.mode.into(),
                    idle: Duration::from_secs(300),
                    circuit: Default::default(),
                },
            );
            self.sync_upstream(name.as_str()).await;
        }
        for (name, cfg) in &diff.servers.changed {
            self.pool.remove(name.as_str(), Duration::from_secs(5)).await;
            self.pool.configure(
                name.clone(),
                PoolConfig {
                    config: Arc::new(cfg.clone()),
                    mode: cfg.mode.into(),
                    idle: Duration::from_secs(300),
                    circuit: Default::default(),
                },
            );
            self.sync_upstream(name.as_str()).await;
        }
        for name in &diff.servers.removed {
            self.pool.remove(name.as_str(), Duration::from_secs(5)).await;
            self.registry.remove_upstream(name.as_str());
            for uri in self.subscriptions.cleanup_upstream(name.as_str()) {
                info!(upstream = %name, uri = %uri, "dropped subscription, upstream removed");
            }
        }

        self.config.store(Arc::new(new_config));
        self.metrics.config_reloads_total.inc();
        info!(
            added = diff.servers.added.len(),
            changed = diff.servers.changed.len(),
            removed = diff.servers.removed.len(),
            "config reload applied"
        );
    }

    pub async fn shutdown(&self) {
        for name in self.pool.upstream_names() {
            self.pool.remove(name.as_str(), Duration::from_secs(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMode, ServerConfig, TransportSpec};

    fn http_server(name: &str, enabled: bool) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            transport: TransportSpec::Http {
                url: format!("http://127.0.0.1:9/{name}"),
                headers: Default::default(),
            },
            enabled,
            mode: Default::default(),
            reconnect: Default::default(),
        }
    }

    #[test]
    fn new_engine_registers_local_tools_before_any_upstream_sync() {
        let engine = Engine::new(Config::default());
        let names: Vec<String> = engine.registry.list_tools().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&localtools::PING_TOOL.to_string()));
        assert!(names.contains(&localtools::LIST_UPSTREAMS_TOOL.to_string()));
    }

    #[test]
    fn disabled_servers_are_never_registered_in_the_pool() {
        let config = Config {
            servers: vec![http_server("on", true), http_server("off", false)],
            ..Config::default()
        };
        let engine = Engine::new(config);
        let names: Vec<String> = engine.pool.upstream_names().into_iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["on".to_string()]);
    }

    #[test]
    fn config_snapshot_reflects_the_value_passed_to_new() {
        let mut config = Config::default();
        config.auth.mode = AuthMode::Apikey;
        config.auth.api_key = Some("secret".to_string());
        let engine = Engine::new(config);
        assert_eq!(engine.config().auth.mode, AuthMode::Apikey);
    }
}

async fn fetch_list<T: serde::de::DeserializeOwned>(
    transport: &UpstreamTransport,
    method: &str,
    field: &str,
) -> Option<Vec<T>> {
    let req = crate::protocol::JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: crate::protocol::RequestId::String(uuid::Uuid::new_v4().to_string()),
        method: method.to_string(),
        params: serde_json::Value::Null,
    };
    match transport.client().call(req, Duration::from_secs(10)).await {
        Ok(resp) => match resp.result.get(field).cloned() {
            Some(v) => serde_json::from_value(v).ok(),
            None => {
                warn!(method, "upstream list response missing expected field");
                None
            }
        },
        Err(e) => {
            warn!(method, error = %e, "upstream list call failed");
            None
        }
    }
}
