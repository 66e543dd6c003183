//! In-memory simulated broker.
//!
//! Fills every valid order immediately at the reference price moved by up to
//! ±1%. Selling without a position opens a short (negative quantity).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use super::traits::{AccountProvider, BackendResult, ExecutionBackend};
use crate::config::PaperConfig;
use crate::constants::paper::{DEFAULT_PRICE, FILL_VARIANCE};
use crate::error::BackendError;
use crate::events::{
    AccountSnapshot, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderStatusRecord, OrderType,
    PositionSnapshot,
};

#[derive(Debug, Default)]
struct PaperState {
    connected: bool,
    balance: f64,
    positions: HashMap<String, PositionSnapshot>,
    orders: HashMap<String, OrderStatusRecord>,
    last_prices: HashMap<String, f64>,
}

#[derive(Clone)]
pub struct PaperBroker {
    config: PaperConfig,
    state: Arc<Mutex<PaperState>>,
}

impl PaperBroker {
    pub fn new(config: PaperConfig) -> Self {
        let state = PaperState {
            balance: config.starting_balance,
            ..PaperState::default()
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Last traded price used as the reference for market orders.
    pub fn set_price(&self, symbol: &str, price: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.last_prices.insert(symbol.to_string(), price);
        }
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().map(|s| s.orders.len()).unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().map(|s| s.connected).unwrap_or(false)
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| BackendError::Transient("paper broker state poisoned".to_string()))
    }

    fn fill_price(reference: f64, order: &OrderRequest) -> f64 {
        let movement = rand::thread_rng().gen_range(-FILL_VARIANCE..=FILL_VARIANCE);
        let price = reference * (1.0 + movement);

        match (order.order_type, order.limit_price) {
            (OrderType::Limit, Some(limit)) if order.side.is_buy() => price.min(limit),
            (OrderType::Limit, Some(limit)) => price.max(limit),
            _ => price,
        }
    }
}

fn apply_fill(position: &mut PositionSnapshot, signed_qty: i64, price: f64) {
    let old_qty = position.quantity;
    let new_qty = old_qty + signed_qty;

    if old_qty == 0 || (old_qty.signum() != new_qty.signum() && new_qty != 0) {
        // Opening or flipping sides
        position.avg_price = price;
    } else if old_qty.signum() == signed_qty.signum() {
        // Adding to the same side
        let total_cost = position.avg_price * old_qty.abs() as f64 + price * signed_qty.abs() as f64;
        position.avg_price = total_cost / new_qty.abs() as f64;
    }
    position.quantity = new_qty;
}

#[async_trait]
impl ExecutionBackend for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn connect(&self) -> BackendResult<()> {
        let mut state = self.lock()?;
        state.connected = true;
        info!("🧪 [PAPER] Connected (balance ${:.2})", state.balance);
        Ok(())
    }

    async fn disconnect(&self) -> BackendResult<()> {
        self.lock()?.connected = false;
        info!("🧪 [PAPER] Disconnected");
        Ok(())
    }

    async fn place_order(&self, order: OrderRequest) -> BackendResult<OrderResult> {
        if !self.lock()?.connected {
            return Err(BackendError::NotConnected);
        }
        if order.quantity == 0 {
            return Err(BackendError::Validation("quantity must be positive".to_string()));
        }

        if self.config.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.execution_delay_ms)).await;
        }

        let mut state = self.lock()?;
        let reference = order
            .limit_price
            .or_else(|| state.last_prices.get(&order.symbol).copied())
            .unwrap_or(DEFAULT_PRICE);
        let fill = Self::fill_price(reference, &order);

        let quantity = i64::try_from(order.quantity)
            .map_err(|_| BackendError::Validation(format!("quantity {} too large", order.quantity)))?;
        let signed_qty = match order.side {
            OrderSide::Buy => quantity,
            OrderSide::Sell | OrderSide::SellShort => -quantity,
        };

        let position = state.positions.entry(order.symbol.clone()).or_default();
        apply_fill(position, signed_qty, fill);
        if position.quantity == 0 {
            state.positions.remove(&order.symbol);
        }
        state.balance -= signed_qty as f64 * fill;
        state.last_prices.insert(order.symbol.clone(), fill);

        let order_id = Uuid::new_v4().to_string();
        state.orders.insert(
            order_id.clone(),
            OrderStatusRecord {
                order_id: order_id.clone(),
                status: OrderStatus::Filled,
                symbol: Some(order.symbol.clone()),
                side: Some(order.side),
                quantity: Some(order.quantity),
                filled_price: Some(fill),
                submitted_at: Some(Utc::now()),
            },
        );

        info!(
            "🧪 [PAPER] Filled {:?} {} {} @ {:.4} (order {})",
            order.side, order.quantity, order.symbol, fill, order_id
        );

        Ok(OrderResult {
            success: true,
            symbol: order.symbol,
            order_id: Some(order_id),
            filled_price: Some(fill),
            filled_quantity: Some(order.quantity),
            status: OrderStatus::Filled,
            error: None,
            execution_time_ms: None,
            correlation_id: order.correlation_id,
        })
    }

    async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
        let state = self.lock()?;
        let margin_used = state
            .positions
            .values()
            .filter(|p| p.quantity < 0)
            .map(|p| p.quantity.unsigned_abs() as f64 * p.avg_price)
            .sum();
        Ok(AccountSnapshot {
            balance: state.balance,
            positions: state.positions.clone(),
            buying_power: state.balance,
            margin_used,
        })
    }

    async fn get_positions(&self) -> BackendResult<HashMap<String, PositionSnapshot>> {
        Ok(self.lock()?.positions.clone())
    }

    async fn get_order_status(&self, order_id: &str) -> BackendResult<OrderStatusRecord> {
        Ok(self
            .lock()?
            .orders
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| OrderStatusRecord::not_found(order_id)))
    }
}

#[async_trait]
impl AccountProvider for PaperBroker {
    async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
        ExecutionBackend::get_account_info(self).await
    }
}
