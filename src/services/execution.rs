use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::ExecutionConfig;
use crate::constants::{execution::EXECUTION_BREAKER, log_events};
use crate::error::BackendError;
use crate::events::{
    AccountSnapshot, Alert, OrderRequest, OrderResult, OrderSide, OrderStatus,
    OrderStatusRecord, OrderType, PositionSnapshot,
};
use crate::exchange::{BackendResult, ExecutionBackend};
use crate::resilience::{CircuitBreaker, CircuitError, CircuitState, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub avg_execution_time_ms: f64,
}

impl ExecutionStats {
    fn record(&mut self, success: bool, elapsed_ms: f64) {
        self.total_trades += 1;
        if success {
            self.successful_trades += 1;
        } else {
            self.failed_trades += 1;
        }
        let n = self.total_trades as f64;
        self.avg_execution_time_ms = (self.avg_execution_time_ms * (n - 1.0) + elapsed_ms) / n;
    }
}

/// Turns approved alerts into broker orders.
///
/// Each `place_order` goes through the `execute_trade` circuit breaker, which
/// wraps the retry policy, which wraps the backend call.
pub struct ExecutionService {
    backend: Arc<dyn ExecutionBackend>,
    config: ExecutionConfig,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    connected: bool,
    stats: ExecutionStats,
}

impl ExecutionService {
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: ExecutionConfig, clock: Arc<dyn Clock>) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        let breaker = CircuitBreaker::new(EXECUTION_BREAKER, config.circuit_breaker.clone(), clock);
        Self {
            backend,
            config,
            retry,
            breaker,
            connected: false,
            stats: ExecutionStats::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn connect(&mut self) -> bool {
        match self.backend.connect().await {
            Ok(()) => {
                info!("🔗 [EXECUTION] Connected to {} backend", self.backend.name());
                self.connected = true;
            }
            Err(e) => {
                error!("❌ [EXECUTION] Failed to connect to {}: {}", self.backend.name(), e);
                self.connected = false;
            }
        }
        self.connected
    }

    pub async fn disconnect(&mut self) {
        if let Err(e) = self.backend.disconnect().await {
            warn!("⚠️ [EXECUTION] Disconnect from {} failed: {}", self.backend.name(), e);
        }
        self.connected = false;
    }

    async fn ensure_connected(&mut self) -> BackendResult<()> {
        if self.connected {
            return Ok(());
        }
        if !self.config.auto_connect {
            return Err(BackendError::NotConnected);
        }
        if self.connect().await {
            Ok(())
        } else {
            Err(BackendError::NotConnected)
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.clone()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn reset_circuit(&mut self) {
        self.breaker.reset();
    }

    /// Build the order for an approved alert, side taken from the direction.
    pub fn build_order(
        &self,
        alert: &Alert,
        quantity: u64,
        correlation_id: &str,
    ) -> Result<OrderRequest, BackendError> {
        self.build_order_for(alert, OrderSide::for_direction(alert.direction), quantity, correlation_id)
    }

    /// Limit orders get the reference price moved against us by the
    /// configured slippage.
    pub fn build_order_for(
        &self,
        alert: &Alert,
        side: OrderSide,
        quantity: u64,
        correlation_id: &str,
    ) -> Result<OrderRequest, BackendError> {
        if quantity == 0 {
            return Err(BackendError::Validation("quantity must be positive".to_string()));
        }

        let limit_price = match self.config.order_type {
            OrderType::Market => None,
            OrderType::Limit => {
                let price = alert
                    .reference_price
                    .filter(|p| p.is_finite() && *p > 0.0)
                    .ok_or_else(|| {
                        BackendError::Validation("limit order needs a positive reference price".to_string())
                    })?;
                Some(apply_slippage(price, side, self.config.slippage))
            }
        };

        Ok(OrderRequest {
            symbol: alert.symbol.clone(),
            side,
            quantity,
            order_type: self.config.order_type,
            limit_price,
            time_in_force: self.config.time_in_force,
            correlation_id: correlation_id.to_string(),
            strategy_id: alert.strategy_id.clone(),
        })
    }

    pub async fn execute(&mut self, alert: &Alert, quantity: u64, correlation_id: &str) -> OrderResult {
        let side = OrderSide::for_direction(alert.direction);
        self.execute_as(alert, side, quantity, correlation_id).await
    }

    /// Execute with the side chosen by the risk guard (`SellShort` when a
    /// bearish alert opens a short).
    pub async fn execute_as(
        &mut self,
        alert: &Alert,
        side: OrderSide,
        quantity: u64,
        correlation_id: &str,
    ) -> OrderResult {
        let started = Instant::now();

        if let Err(e) = self.ensure_connected().await {
            return self.finish(
                OrderResult::failure(&alert.symbol, OrderStatus::Failed, e.to_string(), correlation_id),
                started,
            );
        }

        let request = match self.build_order_for(alert, side, quantity, correlation_id) {
            Ok(request) => request,
            Err(e) => {
                return self.finish(
                    OrderResult::failure(&alert.symbol, OrderStatus::Rejected, e.to_string(), correlation_id),
                    started,
                )
            }
        };

        info!(
            "🚀 [EXECUTION] Submitting {:?} {} {} ({:?}, limit {:?}) [{}]",
            request.side, request.quantity, request.symbol, request.order_type, request.limit_price, correlation_id
        );

        let backend = self.backend.clone();
        let retry = &self.retry;
        let outcome = self
            .breaker
            .call(|| async move {
                retry
                    .run("place_order", |_attempt| {
                        let backend = backend.clone();
                        let request = request.clone();
                        async move { backend.place_order(request).await }
                    })
                    .await
            })
            .await;

        let result = match outcome {
            Ok(mut result) => {
                result.correlation_id = correlation_id.to_string();
                result
            }
            Err(CircuitError::Open { service }) => OrderResult::failure(
                &alert.symbol,
                OrderStatus::CircuitOpen,
                format!("circuit '{}' is open", service),
                correlation_id,
            ),
            Err(CircuitError::Inner(e)) => {
                if e == BackendError::NotConnected {
                    self.connected = false;
                }
                let status = match e {
                    BackendError::Rejected { .. } | BackendError::Validation(_) => OrderStatus::Rejected,
                    _ => OrderStatus::Failed,
                };
                OrderResult::failure(&alert.symbol, status, e.to_string(), correlation_id)
            }
        };

        self.finish(result, started)
    }

    fn finish(&mut self, mut result: OrderResult, started: Instant) -> OrderResult {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        result.execution_time_ms = Some(elapsed_ms);
        self.stats.record(result.success, elapsed_ms);

        if result.success {
            info!(
                event = log_events::ORDER_FILLED,
                "✅ [EXECUTION] {} {:?} x{:?} @ {:?} in {:.1}ms [{}]",
                result.symbol,
                result.status,
                result.filled_quantity,
                result.filled_price,
                elapsed_ms,
                result.correlation_id
            );
        } else {
            warn!(
                event = log_events::ORDER_FAILED,
                "❌ [EXECUTION] {} {:?}: {} [{}]",
                result.symbol,
                result.status,
                result.error.as_deref().unwrap_or("unknown error"),
                result.correlation_id
            );
        }
        result
    }

    pub async fn get_account_info(&mut self) -> BackendResult<AccountSnapshot> {
        self.ensure_connected().await?;
        self.backend.get_account_info().await
    }

    pub async fn get_positions(&mut self) -> BackendResult<HashMap<String, PositionSnapshot>> {
        self.ensure_connected().await?;
        self.backend.get_positions().await
    }

    pub async fn get_order_status(&mut self, order_id: &str) -> BackendResult<OrderStatusRecord> {
        self.ensure_connected().await?;
        self.backend.get_order_status(order_id).await
    }
}

/// Buy limits move up, sell limits move down.
pub fn apply_slippage(price: f64, side: OrderSide, slippage: f64) -> f64 {
    if side.is_buy() {
        price * (1.0 + slippage)
    } else {
        price * (1.0 - slippage)
    }
}
