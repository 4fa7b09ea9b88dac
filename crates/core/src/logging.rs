//! Process-wide tracing setup, initialized once from `main`.
//!
//! Teardown order for the whole process (documented per Design Notes §9 of the
//! spec, since there is no implicit global state otherwise): front-end, then
//! sessions, then pool, then registry, then logger last.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the global `tracing` subscriber from `LOG_LEVEL` (falling back
/// to `level` when unset), using the standard `RUST_LOG`-style filter syntax.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
