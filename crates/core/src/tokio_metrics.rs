//! Exposes `tokio::runtime::RuntimeMetrics` as a `prometheus-client` collector
//! so `GET /metrics` reports scheduler health alongside gateway-specific
//! counters. Registered once, at engine startup, against the current
//! `tokio::runtime::Handle`.

use std::fmt::Error;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;

#[derive(Debug)]
pub struct TokioCollector {
    metrics: tokio::runtime::RuntimeMetrics,
}

impl TokioCollector {
    pub fn register(registry: &mut Registry, handle: &tokio::runtime::Handle) {
        registry.register_collector(Box::new(TokioCollector {
            metrics: handle.metrics(),
        }));
    }

    fn encode_gauge(
        encoder: &mut DescriptorEncoder,
        name: &str,
        help: &str,
        value: u64,
    ) -> Result<(), Error> {
        let gauge = ConstGauge::new(value);
        let metric_encoder = encoder.encode_descriptor(name, help, None, gauge.metric_type())?;
        gauge.encode(metric_encoder)
    }
}

impl Collector for TokioCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), Error> {
        Self::encode_gauge(
            &mut encoder,
            "tokio_num_alive_tasks",
            "number of currently alive tasks in the runtime",
            self.metrics.num_alive_tasks() as u64,
        )?;
        Self::encode_gauge(
            &mut encoder,
            "tokio_num_workers",
            "number of worker threads used by the runtime",
            self.metrics.num_workers() as u64,
        )?;
        Ok(())
    }
}
