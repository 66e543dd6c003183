//! Circuit breaker for downstream dependencies.
//!
//! One breaker per protected call-site. Failures are counted consecutively;
//! once the threshold is hit the breaker opens and rejects calls until the
//! reset timeout has elapsed on the injected [`Clock`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::constants::log_events;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// A limited number of trial calls decide the next state
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitError<E> {
    #[error("Circuit '{service}' is open")]
    Open { service: String },

    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_calls: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Ask permission for one call. Moves OPEN to HALF_OPEN once the reset
    /// timeout has elapsed.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|t| self.clock.now().saturating_duration_since(t))
                    .unwrap_or_default();
                if elapsed >= self.config.reset_timeout() {
                    info!("🔌 [CIRCUIT] '{}' half-open after {:?}", self.name, elapsed);
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < self.config.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            info!("✅ [CIRCUIT] '{}' closed after successful trial", self.name);
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_calls = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(self.clock.now());

        match self.state {
            CircuitState::HalfOpen => {
                warn!(
                    event = log_events::CIRCUIT_OPENED,
                    "⛔ [CIRCUIT] '{}' trial failed, reopening", self.name
                );
                self.state = CircuitState::Open;
                self.half_open_calls = 0;
            }
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => {
                warn!(
                    event = log_events::CIRCUIT_OPENED,
                    "⛔ [CIRCUIT] '{}' opened after {} consecutive failures",
                    self.name,
                    self.failure_count
                );
                self.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
        self.half_open_calls = 0;
    }

    /// Run an async call through the breaker. Every `Err` counts as a failure.
    pub async fn call<T, E, F, Fut>(&mut self, call: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Open {
                service: self.name.clone(),
            });
        }

        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Synchronous counterpart of [`CircuitBreaker::call`].
    pub fn call_sync<T, E, F>(&mut self, call: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Open {
                service: self.name.clone(),
            });
        }

        match call() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }
}

/// Breakers keyed by logical service name.
pub struct CircuitBreakerRegistry {
    clock: Arc<dyn Clock>,
    breakers: HashMap<String, CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            breakers: HashMap::new(),
        }
    }

    /// Returns the breaker for `name`, creating it with `config` on first use.
    pub fn get_or_create(&mut self, name: &str, config: &CircuitBreakerConfig) -> &mut CircuitBreaker {
        let clock = self.clock.clone();
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, config.clone(), clock))
    }

    pub fn get(&self, name: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CircuitBreaker> {
        self.breakers.get_mut(name)
    }

    pub fn states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect()
    }

    pub fn reset_all(&mut self) {
        for breaker in self.breakers.values_mut() {
            breaker.reset();
        }
    }
}
