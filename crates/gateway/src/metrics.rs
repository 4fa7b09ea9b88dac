//! Prometheus metrics for the Router and front-end (spec §4.4 step 8:
//! "emit a metric recording outcome and duration").

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry as PromRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct CallLabels {
    pub upstream: String,
    pub entity: String,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct SessionLabels {
    pub transport: String,
}

pub struct Metrics {
    registry: PromRegistry,
    pub call_duration_seconds: Family<CallLabels, Histogram>,
    pub calls_total: Family<CallLabels, Counter>,
    pub sessions_active: Family<SessionLabels, Counter>,
    pub config_reloads_total: Counter,
    pub config_reload_failures_total: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = PromRegistry::with_prefix("goblin");

        let call_duration_seconds = Family::<CallLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0].into_iter())
        });
        registry.register(
            "call_duration_seconds",
            "Duration of a routed tool/prompt/resource call",
            call_duration_seconds.clone(),
        );

        let calls_total = Family::<CallLabels, Counter>::default();
        registry.register("calls", "Total routed calls by outcome", calls_total.clone());

        let sessions_active = Family::<SessionLabels, Counter>::default();
        registry.register(
            "sessions_opened",
            "Total client sessions opened by transport kind",
            sessions_active.clone(),
        );

        let config_reloads_total = Counter::default();
        registry.register(
            "config_reloads",
            "Total successful hot-reload applications",
            config_reloads_total.clone(),
        );

        let config_reload_failures_total = Counter::default();
        registry.register(
            "config_reload_failures",
            "Total hot-reload attempts rejected during validation",
            config_reload_failures_total.clone(),
        );

        Self {
            registry,
            call_duration_seconds,
            calls_total,
            sessions_active,
            config_reloads_total,
            config_reload_failures_total,
        }
    }

    pub fn record_call(&self, upstream: &str, entity: &str, outcome: &str, duration_seconds: f64) {
        let labels = CallLabels {
            upstream: upstream.to_string(),
            entity: entity.to_string(),
            outcome: outcome.to_string(),
        };
        self.calls_total.get_or_create(&labels).inc();
        self.call_duration_seconds
            .get_or_create(&labels)
            .observe(duration_seconds);
    }

    pub fn encode(&self) -> String {
        let mut buf = String::new();
        let _ = encode(&mut buf, &self.registry);
        buf
    }

    /// Small JSON snapshot for `/status`'s `metrics` field (spec §6: "an
    /// implementation-defined JSON snapshot"), distinct from `/metrics`'s
    /// OpenMetrics text exposition.
    pub fn status_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "configReloadsTotal": self.config_reloads_total.get(),
            "configReloadFailuresTotal": self.config_reload_failures_total.get(),
        })
    }
}
