use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::constants;
use crate::error::ConfigError;
use crate::events::{OrderType, TimeInForce};

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base: f64,
    pub cap_secs: u64,
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
    /// Time allowed between opening the socket and READY / RESUMED
    pub handshake_timeout_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base: constants::gateway::RECONNECT_BASE,
            cap_secs: constants::gateway::RECONNECT_CAP.as_secs(),
            max_attempts: constants::gateway::MAX_RECONNECT_ATTEMPTS,
            connect_timeout_secs: constants::gateway::CONNECT_TIMEOUT.as_secs(),
            handshake_timeout_secs: constants::gateway::HANDSHAKE_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    pub capacity: usize,
    /// How many of the oldest ids to drop when full; half the capacity if unset
    pub evict_count: Option<usize>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: constants::ingest::DEDUP_CAPACITY,
            evict_count: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "rust_alert_trader".to_string(),
            device: "rust_alert_trader".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub token: String,
    pub api_base: String,
    /// Skips REST discovery when set
    pub gateway_url: Option<String>,
    /// Empty means every channel is monitored
    pub channel_ids: Vec<String>,
    /// Empty means every message is treated as a candidate signal
    pub signal_keywords: Vec<String>,
    pub ignore_own_messages: bool,
    pub intents: u64,
    /// Fixed heartbeat interval instead of the one announced by hello
    pub heartbeat_override_ms: Option<u64>,
    pub reconnect: ReconnectConfig,
    pub dedup: DedupConfig,
    pub properties: ClientProperties,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: constants::gateway::DEFAULT_API_BASE.to_string(),
            gateway_url: None,
            channel_ids: Vec::new(),
            signal_keywords: constants::ingest::SIGNAL_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            ignore_own_messages: true,
            intents: constants::gateway::DEFAULT_INTENTS,
            heartbeat_override_ms: None,
            reconnect: ReconnectConfig::default(),
            dedup: DedupConfig::default(),
            properties: ClientProperties::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    /// "standard" is always registered; "chinese" adds the Chinese format
    pub formats: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            formats: vec!["standard".to_string()],
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShortSellingPolicy {
    /// Bearish alerts open short positions freely
    #[default]
    Allow,
    /// Bearish alerts need an existing long position to sell
    RequirePosition,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of balance committed per trade
    pub max_position_size: f64,
    pub max_loss_per_trade: f64,
    /// Fraction of balance the day may lose before trading halts
    pub daily_loss_limit: f64,
    pub max_open_positions: usize,
    pub correlation_threshold: f64,
    pub cooldown_secs: u64,
    pub blacklisted_symbols: Vec<String>,
    pub round_up_to_one_share: bool,
    pub short_selling: ShortSellingPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: constants::risk::MAX_POSITION_SIZE,
            max_loss_per_trade: constants::risk::MAX_LOSS_PER_TRADE,
            daily_loss_limit: constants::risk::DAILY_LOSS_LIMIT,
            max_open_positions: constants::risk::MAX_OPEN_POSITIONS,
            correlation_threshold: constants::risk::CORRELATION_THRESHOLD,
            cooldown_secs: constants::risk::COOLDOWN.as_secs(),
            blacklisted_symbols: Vec::new(),
            round_up_to_one_share: false,
            short_selling: ShortSellingPolicy::Allow,
        }
    }
}

impl RiskConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::execution::RETRY_MAX_ATTEMPTS,
            initial_delay_ms: constants::execution::RETRY_INITIAL_DELAY_MS,
            backoff_factor: constants::execution::RETRY_BACKOFF_FACTOR,
            max_delay_ms: constants::execution::RETRY_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: constants::execution::BREAKER_FAILURE_THRESHOLD,
            reset_timeout_secs: constants::execution::BREAKER_RESET_TIMEOUT_SECS,
            half_open_max_calls: constants::execution::BREAKER_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub slippage: f64,
    pub auto_connect: bool,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            slippage: constants::execution::SLIPPAGE,
            auto_connect: true,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_balance: f64,
    pub execution_delay_ms: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: constants::paper::STARTING_BALANCE,
            execution_delay_ms: constants::paper::EXECUTION_DELAY_MS,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker_type: String, // "paper" | "mock"
    pub paper: PaperConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: "paper".to_string(),
            paper: PaperConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub duplicate_window_secs: u64,
    pub duplicate_cache_capacity: usize,
    /// Falls back to `execution.circuit_breaker` when unset
    pub parser_breaker: Option<CircuitBreakerConfig>,
    pub risk_breaker: Option<CircuitBreakerConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            duplicate_window_secs: constants::orchestrator::DUPLICATE_WINDOW_SECS,
            duplicate_cache_capacity: constants::orchestrator::DUPLICATE_CACHE_CAPACITY,
            parser_breaker: None,
            risk_breaker: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReportingConfig {
    /// JSONL order journal; disabled when unset
    pub journal_path: Option<String>,
    /// Six-field cron expression for the periodic stats log
    pub stats_cron: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub listener: ListenerConfig,
    pub parser: ParserConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub broker: BrokerConfig,
    pub orchestrator: OrchestratorConfig,
    pub reporting: ReportingConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a YAML file, then apply environment overrides and validate.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // Strip BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// `DISCORD_TOKEN` and `DISCORD_CHANNEL_IDS` (comma separated) win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.trim().is_empty() {
                self.listener.token = token.trim().to_string();
            }
        }
        if let Ok(ids) = std::env::var("DISCORD_CHANNEL_IDS") {
            let ids = parse_id_list(&ids);
            if !ids.is_empty() {
                self.listener.channel_ids = ids;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        let fraction = |v: f64| v > 0.0 && v <= 1.0;

        if !fraction(self.risk.max_position_size) {
            return Err(invalid("risk.max_position_size", "must be in (0, 1]"));
        }
        if !fraction(self.risk.daily_loss_limit) {
            return Err(invalid("risk.daily_loss_limit", "must be in (0, 1]"));
        }
        if !(0.0..1.0).contains(&self.execution.slippage) {
            return Err(invalid("execution.slippage", "must be in [0, 1)"));
        }
        if self.execution.retry.max_attempts == 0 {
            return Err(invalid("execution.retry.max_attempts", "must be at least 1"));
        }
        if self.execution.retry.backoff_factor < 1.0 {
            return Err(invalid("execution.retry.backoff_factor", "must be >= 1.0"));
        }
        for (field, breaker) in [
            ("execution.circuit_breaker", Some(&self.execution.circuit_breaker)),
            ("orchestrator.parser_breaker", self.orchestrator.parser_breaker.as_ref()),
            ("orchestrator.risk_breaker", self.orchestrator.risk_breaker.as_ref()),
        ] {
            if let Some(b) = breaker {
                if b.failure_threshold == 0 || b.half_open_max_calls == 0 {
                    return Err(invalid(field, "thresholds must be at least 1"));
                }
            }
        }
        if self.listener.dedup.capacity == 0 {
            return Err(invalid("listener.dedup.capacity", "must be at least 1"));
        }
        if self.listener.reconnect.base < 1.0 {
            return Err(invalid("listener.reconnect.base", "must be >= 1.0"));
        }
        let reconnect = &self.listener.reconnect;
        if reconnect.connect_timeout_secs == 0 || reconnect.handshake_timeout_secs == 0 {
            return Err(invalid("listener.reconnect", "timeouts must be at least 1 second"));
        }
        if self.orchestrator.duplicate_cache_capacity == 0 {
            return Err(invalid("orchestrator.duplicate_cache_capacity", "must be at least 1"));
        }
        Ok(())
    }

    pub fn parser_breaker(&self) -> CircuitBreakerConfig {
        self.orchestrator
            .parser_breaker
            .clone()
            .unwrap_or_else(|| self.execution.circuit_breaker.clone())
    }

    pub fn risk_breaker(&self) -> CircuitBreakerConfig {
        self.orchestrator
            .risk_breaker
            .clone()
            .unwrap_or_else(|| self.execution.circuit_breaker.clone())
    }
}

pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
