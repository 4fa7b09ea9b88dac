//! Shared primitives used by every `goblin` crate: the interned-string alias,
//! build metadata, logging setup, and a tokio runtime metrics collector.
//!
//! Mirrors the role of the teacher's `agent-core` crate: small, dependency-light,
//! and imported by everything else in the workspace via `goblin_core::prelude::*`.

pub mod bow;
pub mod build;
pub mod logging;
pub mod prelude;
pub mod tokio_metrics;

pub use prelude::*;
