//! Application-wide constants and defaults
//!
//! Centralizes tunable defaults so config defaults and tests agree.

use std::time::Duration;

/// Gateway session defaults
pub mod gateway {
    use super::*;

    pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v9";

    /// Appended to the discovered gateway URL
    pub const API_VERSION: &str = "9";
    pub const ENCODING: &str = "json";

    /// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
    pub const DEFAULT_INTENTS: u64 = 33283;

    pub const RECONNECT_BASE: f64 = 2.0;
    pub const RECONNECT_CAP: Duration = Duration::from_secs(30);
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 20;

    /// Budget for opening the socket
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Budget from socket open until READY / RESUMED
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Ingest defaults
pub mod ingest {
    /// Processed message ids kept before eviction
    pub const DEDUP_CAPACITY: usize = 1000;

    pub const SIGNAL_KEYWORDS: &[&str] = &[
        "bias",
        "bullish",
        "bearish",
        "signal",
        "alert",
        "detected symbol",
        "看多",
        "看空",
    ];
}

/// Risk defaults
pub mod risk {
    use super::*;

    pub const MAX_POSITION_SIZE: f64 = 0.02;
    pub const MAX_LOSS_PER_TRADE: f64 = 0.01;
    pub const DAILY_LOSS_LIMIT: f64 = 0.05;
    pub const MAX_OPEN_POSITIONS: usize = 5;
    pub const CORRELATION_THRESHOLD: f64 = 0.7;
    pub const COOLDOWN: Duration = Duration::from_secs(300);
}

/// Execution defaults
pub mod execution {
    pub const SLIPPAGE: f64 = 0.001;
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_INITIAL_DELAY_MS: u64 = 100;
    pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;
    pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

    pub const BREAKER_FAILURE_THRESHOLD: u32 = 3;
    pub const BREAKER_RESET_TIMEOUT_SECS: u64 = 60;
    pub const BREAKER_HALF_OPEN_MAX_CALLS: u32 = 1;

    /// Circuit breaker names, one per protected call-site
    pub const PARSER_BREAKER: &str = "parser";
    pub const RISK_BREAKER: &str = "risk_guard";
    pub const EXECUTION_BREAKER: &str = "execute_trade";
}

/// Orchestrator defaults
pub mod orchestrator {
    pub const DUPLICATE_WINDOW_SECS: u64 = 60;
    pub const DUPLICATE_CACHE_CAPACITY: usize = 1000;
}

/// Paper broker defaults
pub mod paper {
    pub const STARTING_BALANCE: f64 = 100_000.0;
    pub const EXECUTION_DELAY_MS: u64 = 500;
    pub const DEFAULT_PRICE: f64 = 100.0;

    /// Simulated fills move at most this fraction from the reference
    pub const FILL_VARIANCE: f64 = 0.01;
}

/// Logging event names for structured logging
pub mod log_events {
    pub const GATEWAY_CONNECTED: &str = "gateway_connected";
    pub const GATEWAY_RECONNECT_SCHEDULED: &str = "gateway_reconnect_scheduled";
    pub const GATEWAY_FATAL: &str = "gateway_fatal";
    pub const ALERT_PARSED: &str = "alert_parsed";
    pub const ALERT_REJECTED: &str = "alert_rejected";
    pub const ALERT_FAILED: &str = "alert_failed";
    pub const ORDER_FILLED: &str = "order_filled";
    pub const ORDER_FAILED: &str = "order_failed";
    pub const ORDER_RETRY: &str = "order_retry";
    pub const CIRCUIT_OPENED: &str = "circuit_opened";
}
