//! Error types for the alert pipeline
//!
//! Each stage has its own typed error so callers can tell transport faults,
//! parse faults and backend faults apart without string matching.

use thiserror::Error;

/// Gateway transport and session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Failed to open connection to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Malformed gateway frame: {0}")]
    Decode(String),

    #[error("Gateway URL lookup failed: {0}")]
    GatewayUrl(String),

    #[error("Transport is not open")]
    NotOpen,

    #[error("Reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Errors returned by an execution backend or account provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Transient backend error: {0}")]
    Transient(String),

    #[error("Backend timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid order: {0}")]
    Validation(String),

    #[error("Order rejected: {reason}")]
    Rejected { reason: String },

    #[error("Backend is not connected")]
    NotConnected,

    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },
}

impl BackendError {
    /// Transient failures and timeouts are worth another attempt; everything
    /// else would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Timeout { .. })
    }
}

/// Failures extracting an alert from text a parser claimed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("[{parser}] missing required field '{field}'")]
    MissingField { parser: String, field: String },

    #[error("[{parser}] invalid number '{value}' for field '{field}'")]
    InvalidNumber {
        parser: String,
        field: String,
        value: String,
    },

    #[error("[{parser}] {reason}")]
    InvalidValue { parser: String, reason: String },
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unknown broker type '{0}' (expected paper|mock)")]
    UnknownBroker(String),
}

/// Top-level errors surfaced to the process host
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Dispatch task failed: {0}")]
    Task(String),
}
