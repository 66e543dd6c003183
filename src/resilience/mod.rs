pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitError, CircuitState};
pub use retry::{RetryPolicy, Retryable};
