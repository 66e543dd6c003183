//! Retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::constants::log_events;
use crate::error::BackendError;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        BackendError::is_retryable(self)
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// `initial * factor^(attempt-1)`, capped at `max_delay_ms`. `attempt` is 1-based.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.config.initial_delay_ms as f64 * self.config.backoff_factor.powi(exponent);
        let capped = millis.min(self.config.max_delay_ms as f64);
        Duration::from_secs_f64(capped.max(0.0) / 1000.0)
    }

    /// Delay to wait after the given failed attempt, with jitter applied if enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.config.jitter {
            return base;
        }
        let factor = 0.5 + rand::thread_rng().gen::<f64>();
        base.mul_f64(factor)
            .min(Duration::from_millis(self.config.max_delay_ms))
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `call` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        event = log_events::ORDER_RETRY,
                        "🔁 [RETRY] {} attempt {}/{} failed: {} (retrying in {:?})",
                        operation,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("❌ [RETRY] {} gave up after {} attempts: {}", operation, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
