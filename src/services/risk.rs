use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{RiskConfig, ShortSellingPolicy};
use crate::constants::log_events;
use crate::error::BackendError;
use crate::events::{AccountSnapshot, Alert, Direction, OrderSide, RiskDecision};
use crate::exchange::AccountProvider;

/// Partial update for [`RiskGuard::set_risk_parameters`]. Unset fields keep
/// their current value.
#[derive(Debug, Clone, Default)]
pub struct RiskParameterUpdate {
    pub max_position_size: Option<f64>,
    pub max_loss_per_trade: Option<f64>,
    pub daily_loss_limit: Option<f64>,
    pub max_open_positions: Option<usize>,
    pub correlation_threshold: Option<f64>,
    pub cooldown_secs: Option<u64>,
}

/// Pre-trade checks and position sizing.
///
/// Owns the cooldown table and the running daily P&L. Both are pruned or
/// rolled over lazily during evaluation.
pub struct RiskGuard {
    config: RiskConfig,
    accounts: Arc<dyn AccountProvider>,
    clock: Arc<dyn Clock>,
    blacklist: HashSet<String>,
    recent_trades: HashMap<(String, Direction), Instant>,
    daily_pnl: f64,
    pnl_date: NaiveDate,
}

impl RiskGuard {
    pub fn new(config: RiskConfig, accounts: Arc<dyn AccountProvider>, clock: Arc<dyn Clock>) -> Self {
        let blacklist = config
            .blacklisted_symbols
            .iter()
            .map(|s| s.to_uppercase())
            .collect();
        let pnl_date = clock.today();

        info!(
            "🛡️ [RISK] Guard ready: size={:.2}% daily_limit={:.2}% max_positions={} cooldown={}s shorts={:?}",
            config.max_position_size * 100.0,
            config.daily_loss_limit * 100.0,
            config.max_open_positions,
            config.cooldown_secs,
            config.short_selling
        );

        Self {
            config,
            accounts,
            clock,
            blacklist,
            recent_trades: HashMap::new(),
            daily_pnl: 0.0,
            pnl_date,
        }
    }

    pub fn parameters(&self) -> &RiskConfig {
        &self.config
    }

    /// Fetch a fresh account snapshot and evaluate. Blacklist and cooldown are
    /// checked first so rejected alerts never hit the provider.
    pub async fn evaluate(&mut self, alert: &Alert) -> Result<RiskDecision, BackendError> {
        self.roll_over();

        if let Some(decision) = self.pre_account_checks(alert) {
            Self::log_rejection(alert, &decision);
            return Ok(decision);
        }

        let account = self.accounts.get_account_info().await.map_err(|e| {
            warn!("⚠️ [RISK] Account info unavailable for {}: {}", alert.symbol, e);
            e
        })?;

        Ok(self.evaluate_with_account(alert, &account))
    }

    /// Evaluate against an already-fetched snapshot.
    pub fn evaluate_with_account(&mut self, alert: &Alert, account: &AccountSnapshot) -> RiskDecision {
        self.roll_over();

        let decision = self
            .pre_account_checks(alert)
            .unwrap_or_else(|| self.account_checks(alert, account));

        if decision.approved {
            self.recent_trades
                .insert((alert.symbol.to_uppercase(), alert.direction), self.clock.now());
            info!(
                "✅ [RISK] Approved {} {} x{} (risk score {:.4})",
                alert.direction, alert.symbol, decision.position_size, decision.risk_score
            );
        } else {
            Self::log_rejection(alert, &decision);
        }
        decision
    }

    fn pre_account_checks(&self, alert: &Alert) -> Option<RiskDecision> {
        let symbol = alert.symbol.to_uppercase();

        if self.blacklist.contains(&symbol) {
            return Some(RiskDecision::reject(format!("symbol {} is blacklisted", symbol)));
        }

        if let Some(last) = self.recent_trades.get(&(symbol.clone(), alert.direction)) {
            let elapsed = self.clock.now().saturating_duration_since(*last);
            if elapsed < self.config.cooldown() {
                return Some(RiskDecision::reject(format!(
                    "cooldown active for {} {} ({}s remaining)",
                    alert.direction,
                    symbol,
                    (self.config.cooldown() - elapsed).as_secs()
                )));
            }
        }
        None
    }

    fn account_checks(&self, alert: &Alert, account: &AccountSnapshot) -> RiskDecision {
        let balance = account.balance;

        let loss_floor = -self.config.daily_loss_limit * balance;
        if self.daily_pnl < loss_floor {
            return RiskDecision::reject(format!(
                "daily loss limit reached (P&L {:.2} below {:.2})",
                self.daily_pnl, loss_floor
            ));
        }

        let open = account.open_position_count();
        if open >= self.config.max_open_positions {
            return RiskDecision::reject(format!(
                "max open positions reached ({}/{})",
                open, self.config.max_open_positions
            ));
        }

        let long = holds_long(account, &alert.symbol);
        if alert.direction == Direction::Bearish
            && self.config.short_selling == ShortSellingPolicy::RequirePosition
            && !long
        {
            return RiskDecision::reject(format!(
                "short selling disabled and no long position in {}",
                alert.symbol
            ));
        }

        let quantity = self.position_size(alert.reference_price, balance);
        if quantity == 0 {
            return RiskDecision::reject_sized(
                format!(
                    "position size is zero (balance {:.2}, price {:?})",
                    balance, alert.reference_price
                ),
                0,
            );
        }

        let price = alert.reference_price.unwrap_or_default();
        let risk_score = if balance > 0.0 {
            quantity as f64 * price / balance
        } else {
            0.0
        };
        let side = match alert.direction {
            Direction::Bullish => OrderSide::Buy,
            Direction::Bearish if long => OrderSide::Sell,
            Direction::Bearish => OrderSide::SellShort,
        };
        RiskDecision::approve(side, quantity, risk_score)
    }

    /// `floor(balance * max_position_size / price)`. Missing or non-positive
    /// prices size to zero.
    pub fn position_size(&self, reference_price: Option<f64>, balance: f64) -> u64 {
        let price = match reference_price {
            Some(p) if p.is_finite() && p > 0.0 => p,
            _ => return 0,
        };
        let dollar_risk = balance * self.config.max_position_size;
        if !dollar_risk.is_finite() || dollar_risk <= 0.0 {
            return 0;
        }

        let shares = (dollar_risk / price).floor() as u64;
        if shares == 0 && self.config.round_up_to_one_share {
            1
        } else {
            shares
        }
    }

    /// Add realized P&L for the current day.
    pub fn update_daily_pnl(&mut self, pnl: f64) {
        self.roll_over();
        self.daily_pnl += pnl;
        debug!("[RISK] Daily P&L now {:.2}", self.daily_pnl);
    }

    pub fn daily_pnl(&mut self) -> f64 {
        self.roll_over();
        self.daily_pnl
    }

    pub fn set_risk_parameters(&mut self, update: RiskParameterUpdate) {
        if let Some(v) = update.max_position_size {
            self.config.max_position_size = v;
        }
        if let Some(v) = update.max_loss_per_trade {
            self.config.max_loss_per_trade = v;
        }
        if let Some(v) = update.daily_loss_limit {
            self.config.daily_loss_limit = v;
        }
        if let Some(v) = update.max_open_positions {
            self.config.max_open_positions = v;
        }
        if let Some(v) = update.correlation_threshold {
            self.config.correlation_threshold = v;
        }
        if let Some(v) = update.cooldown_secs {
            self.config.cooldown_secs = v;
        }
        info!("🛡️ [RISK] Parameters updated: {:?}", self.config);
    }

    pub fn add_to_blacklist(&mut self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        info!("🚫 [RISK] Blacklisted {}", symbol);
        self.blacklist.insert(symbol);
    }

    pub fn remove_from_blacklist(&mut self, symbol: &str) -> bool {
        self.blacklist.remove(&symbol.to_uppercase())
    }

    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        self.blacklist.contains(&symbol.to_uppercase())
    }

    pub fn cooldown_entries(&self) -> usize {
        self.recent_trades.len()
    }

    fn roll_over(&mut self) {
        let today = self.clock.today();
        if today != self.pnl_date {
            info!(
                "📅 [RISK] New trading day {}, resetting daily P&L ({:.2})",
                today, self.daily_pnl
            );
            self.daily_pnl = 0.0;
            self.pnl_date = today;
        }

        let now = self.clock.now();
        let cooldown = self.config.cooldown();
        self.recent_trades
            .retain(|_, at| now.saturating_duration_since(*at) < cooldown);
    }

    fn log_rejection(alert: &Alert, decision: &RiskDecision) {
        info!(
            event = log_events::ALERT_REJECTED,
            "🛡️ [RISK] Rejected {} {}: {}",
            alert.direction,
            alert.symbol,
            decision.reason.as_deref().unwrap_or("unspecified")
        );
    }
}

fn holds_long(account: &AccountSnapshot, symbol: &str) -> bool {
    account
        .positions
        .get(&symbol.to_uppercase())
        .or_else(|| account.positions.get(symbol))
        .map(|p| p.quantity > 0)
        .unwrap_or(false)
}
