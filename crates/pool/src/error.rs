use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PoolError {
    #[error("circuit open for upstream {0}")]
    CircuitOpen(String),
    #[error("connect failed for upstream {0}: {1}")]
    Connect(String, Arc<str>),
    #[error("unknown upstream {0}")]
    UnknownUpstream(String),
}
