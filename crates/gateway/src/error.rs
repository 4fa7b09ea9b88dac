//! Error taxonomy (spec §7). These are *kinds*, not wire types — the MCP
//! error code each maps to lives in `protocol::JsonRpcError::from_kind`.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("connection error for upstream {0}: {1}")]
    ConnectionError(String, String),

    #[error("circuit open for upstream {0}")]
    CircuitOpen(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<goblin_pool::PoolError> for GatewayError {
    fn from(e: goblin_pool::PoolError) -> Self {
        match e {
            goblin_pool::PoolError::CircuitOpen(u) => GatewayError::CircuitOpen(u),
            goblin_pool::PoolError::Connect(u, reason) => {
                GatewayError::ConnectionError(u, reason.to_string())
            }
            goblin_pool::PoolError::UnknownUpstream(u) => {
                GatewayError::NotFound(format!("upstream {u}"))
            }
        }
    }
}

/// JSON-RPC / MCP error codes this gateway actually produces (spec §7).
pub mod mcp_code {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const REQUEST_TIMEOUT: i64 = -32001;
    pub const INTERNAL_ERROR: i64 = -32603;
}

impl GatewayError {
    pub fn mcp_code(&self) -> i64 {
        use mcp_code::*;
        match self {
            GatewayError::NotFound(_) => METHOD_NOT_FOUND,
            GatewayError::InvalidRequest(_) => INVALID_REQUEST,
            GatewayError::InvalidParams(_) => INVALID_PARAMS,
            GatewayError::RequestTimeout(_) => REQUEST_TIMEOUT,
            GatewayError::CircuitOpen(_) => REQUEST_TIMEOUT,
            GatewayError::ConnectionError(_, _) => INTERNAL_ERROR,
            GatewayError::LimitExceeded(_) => INVALID_REQUEST,
            GatewayError::Cancelled => INTERNAL_ERROR,
            GatewayError::Internal(_) => INTERNAL_ERROR,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
