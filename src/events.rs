//! Data model shared by every pipeline stage.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message as it arrived from the event source, before any filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    pub event_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Metadata handed to the orchestrator alongside the text.
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("message_id".to_string(), self.event_id.clone()),
            ("channel_id".to_string(), self.channel_id.clone()),
            ("author_id".to_string(), self.author_id.clone()),
            ("author".to_string(), self.author_name.clone()),
            ("timestamp".to_string(), self.timestamp.to_rfc3339()),
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured trading signal extracted from raw text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub reference_price: Option<f64>,
    pub direction: Direction,
    pub strategy_id: String,
    pub market_data: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub confidence: f64,
    pub correlation_id: Option<String>,
    pub raw_text: String,
    pub metadata: HashMap<String, String>,
}

impl Alert {
    pub fn new(symbol: impl Into<String>, reference_price: Option<f64>, direction: Direction) -> Self {
        Self {
            symbol: symbol.into(),
            reference_price,
            direction,
            strategy_id: "unknown".to_string(),
            market_data: HashMap::new(),
            timestamp: Utc::now(),
            source: "unknown".to_string(),
            confidence: 1.0,
            correlation_id: None,
            raw_text: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.direction == Direction::Bullish
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: Option<String>,
    pub position_size: u64,
    pub risk_score: f64,
    /// Order side for an approved alert: a bearish alert against a long
    /// position sells it, otherwise it opens a short
    pub side: Option<OrderSide>,
}

impl RiskDecision {
    pub fn approve(side: OrderSide, position_size: u64, risk_score: f64) -> Self {
        Self {
            approved: true,
            reason: None,
            position_size,
            risk_score,
            side: Some(side),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::reject_sized(reason, 0)
    }

    pub fn reject_sized(reason: impl Into<String>, position_size: u64) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            position_size,
            risk_score: 0.0,
            side: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
    SellShort,
}

impl OrderSide {
    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }

    /// Side used when no position information is available.
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => OrderSide::Buy,
            Direction::Bearish => OrderSide::Sell,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
    Ioc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub correlation_id: String,
    pub strategy_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Accepted,
    Rejected,
    Failed,
    CircuitOpen,
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub symbol: String,
    pub order_id: Option<String>,
    pub filled_price: Option<f64>,
    pub filled_quantity: Option<u64>,
    pub status: OrderStatus,
    pub error: Option<String>,
    pub execution_time_ms: Option<f64>,
    pub correlation_id: String,
}

impl OrderResult {
    pub fn failure(
        symbol: impl Into<String>,
        status: OrderStatus,
        error: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            symbol: symbol.into(),
            order_id: None,
            filled_price: None,
            filled_quantity: None,
            status,
            error: Some(error.into()),
            execution_time_ms: None,
            correlation_id: correlation_id.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Negative for short positions
    pub quantity: i64,
    pub avg_price: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub positions: HashMap<String, PositionSnapshot>,
    pub buying_power: f64,
    pub margin_used: f64,
}

impl AccountSnapshot {
    pub fn with_balance(balance: f64) -> Self {
        Self {
            balance,
            positions: HashMap::new(),
            buying_power: balance,
            margin_used: 0.0,
        }
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|p| p.quantity != 0).count()
    }
}

/// Status record returned by order lookups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusRecord {
    pub order_id: String,
    pub status: OrderStatus,
    pub symbol: Option<String>,
    pub side: Option<OrderSide>,
    pub quantity: Option<u64>,
    pub filled_price: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl OrderStatusRecord {
    pub fn not_found(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::NotFound,
            symbol: None,
            side: None,
            quantity: None,
            filled_price: None,
            submitted_at: None,
        }
    }
}
