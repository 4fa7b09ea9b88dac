//! Generic transport pool: single-flight connects, lifecycle-mode-driven
//! eviction, and a circuit breaker gate, keyed by upstream name.
//!
//! This crate knows nothing about MCP — it is parameterized over a
//! `Connectable` transport type supplied by `goblin-gateway`, mirroring the
//! teacher's split between `agent-pool` (generic) and `agentgateway`
//! (protocol-specific transports).

pub mod circuit;
mod error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use goblin_core::prelude::Strng;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

pub use circuit::{CircuitBreaker, CircuitPhase, CircuitThresholds};
pub use error::PoolError;

/// Capability set every transport kind must provide to be poolable. Connect
/// failures are carried as a display-able reason rather than a generic
/// `Connectable::Error` associated type, since the pool only needs to log and
/// classify them, never downcast them.
#[async_trait]
pub trait Connectable: Send + Sync + Sized + 'static {
    type Config: Clone + Send + Sync + 'static;

    async fn connect(name: &str, config: &Self::Config) -> Result<Self, Arc<str>>;
    async fn close(&self);
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleMode {
    #[default]
    Stateful,
    Smart,
    Stateless,
}

#[derive(Debug, Clone)]
pub struct PoolConfig<C> {
    pub config: C,
    pub mode: LifecycleMode,
    pub idle: Duration,
    pub circuit: CircuitThresholds,
}

struct Entry<T: Connectable> {
    name: Strng,
    pool_config: PoolConfig<T::Config>,
    connect_lock: AsyncMutex<Option<Arc<T>>>,
    last_activity_millis: AtomicI64,
    inflight: AtomicUsize,
    circuit: CircuitBreaker,
}

impl<T: Connectable> Entry<T> {
    fn touch(&self) {
        self
            .last_activity_millis
            .store(now_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity_millis.load(Ordering::Relaxed);
        let delta = now_millis().saturating_sub(last);
        Duration::from_millis(delta.max(0) as u64)
    }
}

fn now_millis() -> i64 {
    // Relative clock is fine here: only ever compared against other calls to
    // this same function within the process lifetime.
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub name: Strng,
    pub connected: bool,
    pub inflight: usize,
    pub circuit: CircuitPhase,
}

/// Transport pool. Owns at most one live transport per upstream name and
/// guarantees single-flight connects (spec invariant 5).
pub struct Pool<T: Connectable> {
    entries: RwLock<IndexMap<Strng, Arc<Entry<T>>>>,
}

impl<T: Connectable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Connectable> Pool<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Registers (or replaces the static config of) an upstream without
    /// connecting. Connection happens lazily on first `get_transport`, per
    /// every lifecycle mode in the spec.
    pub fn configure(&self, name: Strng, pool_config: PoolConfig<T::Config>) {
        let entry = Arc::new(Entry {
            name: name.clone(),
            circuit: CircuitBreaker::new(pool_config.circuit),
            pool_config,
            connect_lock: AsyncMutex::new(None),
            last_activity_millis: AtomicI64::new(now_millis()),
            inflight: AtomicUsize::new(0),
        });
        self.entries.write().insert(name, entry);
    }

    pub fn upstream_names(&self) -> Vec<Strng> {
        self.entries.read().keys().cloned().collect()
    }

    fn entry(&self, name: &str) -> Result<Arc<Entry<T>>, PoolError> {
        self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::UnknownUpstream(name.to_string()))
    }

    /// Acquires a connected transport for `name`, connecting it if necessary.
    /// Concurrent callers for the same cold upstream share one connect
    /// attempt via the entry's async mutex.
    pub async fn get_transport(&self, name: &str) -> Result<Arc<T>, PoolError> {
        let entry = self.entry(name)?;

        if !entry.circuit.permits_attempt() {
            return Err(PoolError::CircuitOpen(name.to_string()));
        }

        let mut guard = entry.connect_lock.lock().await;

        if entry.pool_config.mode != LifecycleMode::Stateless {
            if let Some(t) = guard.as_ref() {
                if t.is_connected() {
                    entry.touch();
                    entry.inflight.fetch_add(1, Ordering::Relaxed);
                    return Ok(t.clone());
                }
                debug!(upstream = %name, "cached transport disconnected, reconnecting");
                *guard = None;
            }
        }

        match T::connect(name, &entry.pool_config.config).await {
            Ok(transport) => {
                let transport = Arc::new(transport);
                entry.circuit.record_success();
                entry.touch();
                entry.inflight.fetch_add(1, Ordering::Relaxed);
                if entry.pool_config.mode != LifecycleMode::Stateless {
                    *guard = Some(transport.clone());
                }
                Ok(transport)
            }
            Err(reason) => {
                entry.circuit.record_failure();
                warn!(upstream = %name, error = %reason, "connect failed");
                Err(PoolError::Connect(name.to_string(), reason))
            }
        }
    }

    /// Releases one in-flight use of `name`'s transport. `stateless` closes
    /// immediately; `smart` resets the idle timer implicitly (via `touch` on
    /// next acquisition); `stateful` is a no-op beyond the inflight count.
    pub async fn release(&self, name: &str) {
        let Ok(entry) = self.entry(name) else {
            return;
        };
        entry.inflight.fetch_sub(1, Ordering::Relaxed).min(1);
        if entry.pool_config.mode == LifecycleMode::Stateless {
            let mut guard = entry.connect_lock.lock().await;
            if let Some(t) = guard.take() {
                t.close().await;
            }
        }
    }

    /// Drains in-flight use (bounded by `drain`) then closes and forgets the
    /// upstream entirely.
    pub async fn remove(&self, name: &str, drain: Duration) {
        let entry = {
            let mut entries = self.entries.write();
            entries.shift_remove(name)
        };
        let Some(entry) = entry else { return };

        let deadline = Instant::now() + drain;
        while entry.inflight.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut guard = entry.connect_lock.lock().await;
        if let Some(t) = guard.take() {
            t.close().await;
        }
    }

    pub fn health_snapshot(&self) -> Vec<HealthSnapshot> {
        let entries = self.entries.read();
        entries
            .values()
            .map(|e| {
                let connected = e
                    .connect_lock
                    .try_lock()
                    .map(|g| g.as_ref().map(|t| t.is_connected()).unwrap_or(false))
                    .unwrap_or(true);
                HealthSnapshot {
                    name: e.name.clone(),
                    connected,
                    inflight: e.inflight.load(Ordering::Relaxed),
                    circuit: e.circuit.phase(),
                }
            })
            .collect()
    }

    /// Periodic sweep for `smart`-mode entries idle past their configured
    /// timeout. Intended to be driven by a long-lived task spawned once at
    /// startup (see `goblin-gateway`'s engine wiring).
    pub async fn evict_idle(&self) {
        let candidates: Vec<Arc<Entry<T>>> = {
            let entries = self.entries.read();
            entries
                .values()
                .filter(|e| e.pool_config.mode == LifecycleMode::Smart)
                .filter(|e| e.inflight.load(Ordering::Relaxed) == 0)
                .filter(|e| e.idle_for() >= e.pool_config.idle)
                .cloned()
                .collect()
        };
        for entry in candidates {
            let mut guard = entry.connect_lock.lock().await;
            if let Some(t) = guard.take() {
                debug!(upstream = %entry.name, "evicting idle transport");
                t.close().await;
            }
        }
    }
}

/// Diff between two upstream name→config snapshots, used by the Config
/// Manager to apply a reload atomically (spec §4.2, §4.8).
#[derive(Debug)]
pub struct ConfigDiff<C> {
    pub added: Vec<(Strng, C)>,
    pub removed: Vec<Strng>,
    pub changed: Vec<(Strng, C)>,
}

impl<C> Default for ConfigDiff<C> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }
}

pub fn diff_configs<C: Clone + PartialEq>(
    old: &HashMap<Strng, C>,
    new: &HashMap<Strng, C>,
) -> ConfigDiff<C> {
    let mut out = ConfigDiff::default();
    for (name, cfg) in new {
        match old.get(name) {
            None => out.added.push((name.clone(), cfg.clone())),
            Some(old_cfg) if old_cfg != cfg => out.changed.push((name.clone(), cfg.clone())),
            Some(_) => {}
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            out.removed.push(name.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};

    use super::*;

    #[derive(Clone)]
    struct CountingConfig {
        connects: Arc<StdAtomicUsize>,
        fail: bool,
    }

    #[derive(Debug)]
    struct FakeTransport {
        connected: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Connectable for FakeTransport {
        type Config = CountingConfig;

        async fn connect(_name: &str, config: &Self::Config) -> Result<Self, Arc<str>> {
            config.connects.fetch_add(1, StdOrdering::SeqCst);
            if config.fail {
                return Err(Arc::from("boom"));
            }
            Ok(FakeTransport {
                connected: std::sync::atomic::AtomicBool::new(true),
            })
        }

        async fn close(&self) {
            self.connected.store(false, StdOrdering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(StdOrdering::SeqCst)
        }
    }

    #[tokio::test]
    async fn single_flight_connects_once() {
        let pool: Pool<FakeTransport> = Pool::new();
        let connects = Arc::new(StdAtomicUsize::new(0));
        pool.configure(
            "a".into(),
            PoolConfig {
                config: CountingConfig {
                    connects: connects.clone(),
                    fail: false,
                },
                mode: LifecycleMode::Stateful,
                idle: Duration::from_secs(60),
                circuit: CircuitThresholds::default(),
            },
        );

        let pool = Arc::new(pool);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.get_transport("a").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(connects.load(StdOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_repeated_failures() {
        let pool: Pool<FakeTransport> = Pool::new();
        let connects = Arc::new(StdAtomicUsize::new(0));
        pool.configure(
            "a".into(),
            PoolConfig {
                config: CountingConfig {
                    connects: connects.clone(),
                    fail: true,
                },
                mode: LifecycleMode::Stateful,
                idle: Duration::from_secs(60),
                circuit: CircuitThresholds {
                    failure_threshold: 2,
                    success_threshold: 1,
                    open_timeout: Duration::from_secs(30),
                },
            },
        );

        assert!(pool.get_transport("a").await.is_err());
        assert!(pool.get_transport("a").await.is_err());
        let err = pool.get_transport("a").await.unwrap_err();
        assert!(matches!(err, PoolError::CircuitOpen(_)));
        // the third call should fail fast without attempting to connect
        assert_eq!(connects.load(StdOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_upstream_errors() {
        let pool: Pool<FakeTransport> = Pool::new();
        let err = pool.get_transport("ghost").await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownUpstream(_)));
    }

    #[test]
    fn diff_detects_added_removed_changed() {
        let mut old = HashMap::new();
        old.insert(Strng::from("a"), 1);
        old.insert(Strng::from("b"), 2);
        let mut new = HashMap::new();
        new.insert(Strng::from("a"), 1);
        new.insert(Strng::from("b"), 3);
        new.insert(Strng::from("c"), 4);

        let diff = diff_configs(&old, &new);
        assert_eq!(diff.added, vec![(Strng::from("c"), 4)]);
        assert!(diff.removed.is_empty());
        assert!(diff.changed.iter().any(|(n, v)| n == "b" && *v == 3));
    }
}
