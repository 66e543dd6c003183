//! Alert pipeline coordinator.
//!
//! One call to [`Orchestrator::handle`] takes a message through duplicate
//! suppression, parsing, risk evaluation and execution under a single
//! correlation id. Every outcome ends up in [`PipelineStats`]; nothing
//! escapes `handle` except a boolean.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::constants::{
    execution::{PARSER_BREAKER, RISK_BREAKER},
    log_events,
};
use crate::events::{Alert, OrderResult, OrderSide, OrderStatus};
use crate::exchange::{AccountProvider, ExecutionBackend};
use crate::gateway::CallbackError;
use crate::parser::ParserRegistry;
use crate::resilience::{CircuitBreakerRegistry, CircuitError, CircuitState};
use crate::services::execution::{ExecutionService, ExecutionStats};
use crate::services::risk::RiskGuard;

pub type AlertCallback = Box<dyn Fn(&Alert) -> Result<(), CallbackError> + Send + Sync>;
pub type OrderCallback = Box<dyn Fn(&OrderResult) -> Result<(), CallbackError> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub alerts_received: u64,
    pub alerts_processed: u64,
    pub alerts_rejected: u64,
    pub alerts_failed: u64,
    pub orders_placed: u64,
    pub orders_filled: u64,
    pub orders_failed: u64,
    pub execution: ExecutionStats,
}

/// Shared read access to the live counters.
#[derive(Clone, Default)]
pub struct StatsHandle(Arc<Mutex<PipelineStats>>);

impl StatsHandle {
    pub fn snapshot(&self) -> PipelineStats {
        self.lock().clone()
    }

    fn update(&self, f: impl FnOnce(&mut PipelineStats)) {
        let mut stats = self.lock();
        f(&mut stats);
    }

    /// Counters stay usable after a callback panicked mid-update.
    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        self.0.lock().unwrap_or_else(|poisoned| {
            warn!("⚠️ [ORCHESTRATOR] Stats lock poisoned, recovering counters");
            poisoned.into_inner()
        })
    }
}

/// Content hashes of recently executed messages.
pub struct DuplicateAlertCache {
    window: Duration,
    capacity: usize,
    entries: HashMap<u64, Instant>,
}

impl DuplicateAlertCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn content_hash(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    pub fn is_duplicate(&self, hash: u64, now: Instant) -> bool {
        self.entries
            .get(&hash)
            .map(|at| now.saturating_duration_since(*at) < self.window)
            .unwrap_or(false)
    }

    pub fn record(&mut self, hash: u64, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|_, at| now.saturating_duration_since(*at) < window);

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.entries.iter().min_by_key(|(_, at)| **at).map(|(h, _)| *h) {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(hash, now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Orchestrator {
    parsers: ParserRegistry,
    risk: RiskGuard,
    execution: ExecutionService,
    breakers: CircuitBreakerRegistry,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    duplicates: DuplicateAlertCache,
    alert_callbacks: Vec<AlertCallback>,
    order_callbacks: Vec<OrderCallback>,
    stats: StatsHandle,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn ExecutionBackend>,
        accounts: Arc<dyn AccountProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let parsers = ParserRegistry::from_formats(&config.parser.formats);
        let risk = RiskGuard::new(config.risk.clone(), accounts, clock.clone());
        let execution = ExecutionService::new(backend, config.execution.clone(), clock.clone());

        let mut breakers = CircuitBreakerRegistry::new(clock.clone());
        breakers.get_or_create(PARSER_BREAKER, &config.parser_breaker());
        breakers.get_or_create(RISK_BREAKER, &config.risk_breaker());

        let duplicates = DuplicateAlertCache::new(
            config.orchestrator.duplicate_window(),
            config.orchestrator.duplicate_cache_capacity,
        );

        Self {
            parsers,
            risk,
            execution,
            breakers,
            config,
            clock,
            duplicates,
            alert_callbacks: Vec::new(),
            order_callbacks: Vec::new(),
            stats: StatsHandle::default(),
        }
    }

    /// Replace the parser registry, e.g. to add a custom format.
    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn add_alert_callback(&mut self, callback: AlertCallback) {
        self.alert_callbacks.push(callback);
    }

    pub fn add_order_callback(&mut self, callback: OrderCallback) {
        self.order_callbacks.push(callback);
    }

    pub fn risk_guard_mut(&mut self) -> &mut RiskGuard {
        &mut self.risk
    }

    pub fn execution_mut(&mut self) -> &mut ExecutionService {
        &mut self.execution
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// State of every breaker, including the execution one.
    pub fn breaker_states(&self) -> HashMap<String, CircuitState> {
        let mut states = self.breakers.states();
        states.insert(
            crate::constants::execution::EXECUTION_BREAKER.to_string(),
            self.execution.circuit_state(),
        );
        states
    }

    pub async fn start(&mut self) -> bool {
        info!(
            "🚦 [ORCHESTRATOR] Starting with {} backend, parsers {:?}",
            self.execution.backend_name(),
            self.parsers.parser_names()
        );
        self.execution.connect().await
    }

    pub async fn stop(&mut self) {
        info!("🛑 [ORCHESTRATOR] Stopping; final stats: {:?}", self.stats());
        self.execution.disconnect().await;
    }

    /// Run one message through the pipeline. Returns `true` only when an
    /// order was placed successfully.
    pub async fn handle(&mut self, raw_text: &str, metadata: HashMap<String, String>) -> bool {
        let correlation_id = Uuid::new_v4().to_string();
        self.stats.update(|s| s.alerts_received += 1);

        let span = info_span!("alert", correlation_id = %correlation_id);
        let outcome = AssertUnwindSafe(self.process(raw_text, metadata, &correlation_id))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(success) => success,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    event = log_events::ALERT_FAILED,
                    "💥 [ORCHESTRATOR] Unexpected failure [{}]: {}", correlation_id, message
                );
                self.stats.update(|s| s.alerts_failed += 1);
                false
            }
        }
    }

    async fn process(
        &mut self,
        raw_text: &str,
        metadata: HashMap<String, String>,
        correlation_id: &str,
    ) -> bool {
        let hash = DuplicateAlertCache::content_hash(raw_text);
        if self.duplicates.is_duplicate(hash, self.clock.now()) {
            info!(
                event = log_events::ALERT_REJECTED,
                "🔁 [ORCHESTRATOR] Duplicate message within {}s window, skipping",
                self.config.orchestrator.duplicate_window_secs
            );
            self.stats.update(|s| s.alerts_rejected += 1);
            return false;
        }

        let parser_cfg = self.config.parser_breaker();
        let parsers = &self.parsers;
        let parsed = self
            .breakers
            .get_or_create(PARSER_BREAKER, &parser_cfg)
            .call_sync(|| parsers.parse(raw_text));

        let mut alert = match parsed {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                let preview: String = raw_text.chars().take(100).collect();
                warn!("⚠️ [ORCHESTRATOR] No parser matched: {}", preview);
                self.stats.update(|s| s.alerts_failed += 1);
                return false;
            }
            Err(e) => {
                error!(
                    event = log_events::ALERT_FAILED,
                    "❌ [ORCHESTRATOR] Parse failed [{}]: {}", correlation_id, e
                );
                self.stats.update(|s| s.alerts_failed += 1);
                return false;
            }
        };

        alert.correlation_id = Some(correlation_id.to_string());
        alert.metadata = metadata;
        alert.raw_text = raw_text.to_string();

        info!(
            "📨 [ORCHESTRATOR] Alert {} {} @ {:?} (strategy {}) [{}]",
            alert.direction, alert.symbol, alert.reference_price, alert.strategy_id, correlation_id
        );
        self.notify_alert(&alert);

        let (side, quantity) = match self.evaluate_risk(&alert).await {
            RiskOutcome::Approved(side, quantity) => (side, quantity),
            RiskOutcome::Rejected => {
                self.stats.update(|s| s.alerts_rejected += 1);
                return false;
            }
            RiskOutcome::Failed => {
                self.stats.update(|s| s.alerts_failed += 1);
                return false;
            }
        };

        let result = self
            .execution
            .execute_as(&alert, side, quantity, correlation_id)
            .await;
        let execution_stats = self.execution.stats();
        self.stats.update(|s| {
            if result.success {
                s.orders_placed += 1;
                if result.status == OrderStatus::Filled {
                    s.orders_filled += 1;
                }
            } else {
                s.orders_failed += 1;
            }
            s.alerts_processed += 1;
            s.execution = execution_stats;
        });

        self.notify_order(&result);
        self.duplicates.record(hash, self.clock.now());

        result.success
    }

    async fn evaluate_risk(&mut self, alert: &Alert) -> RiskOutcome {
        let risk_cfg = self.config.risk_breaker();
        let risk = &mut self.risk;
        let outcome = self
            .breakers
            .get_or_create(RISK_BREAKER, &risk_cfg)
            .call(|| async move { risk.evaluate(alert).await })
            .await;

        match outcome {
            Ok(decision) if decision.approved => RiskOutcome::Approved(
                decision
                    .side
                    .unwrap_or_else(|| OrderSide::for_direction(alert.direction)),
                decision.position_size,
            ),
            Ok(_) => RiskOutcome::Rejected,
            Err(CircuitError::Open { service }) => {
                warn!("⛔ [ORCHESTRATOR] Circuit '{}' open, skipping {}", service, alert.symbol);
                RiskOutcome::Failed
            }
            Err(CircuitError::Inner(e)) => {
                error!(
                    event = log_events::ALERT_FAILED,
                    "❌ [ORCHESTRATOR] Risk evaluation failed for {}: account info unavailable ({})",
                    alert.symbol,
                    e
                );
                RiskOutcome::Failed
            }
        }
    }

    /// Risk and execution for an alert built by hand; no parsing, no
    /// duplicate check, no pipeline counters.
    pub async fn execute_manual_trade(&mut self, mut alert: Alert) -> OrderResult {
        let correlation_id = alert
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        alert.correlation_id = Some(correlation_id.clone());

        let decision = match self.risk.evaluate(&alert).await {
            Ok(decision) => decision,
            Err(e) => {
                return OrderResult::failure(
                    &alert.symbol,
                    OrderStatus::Failed,
                    format!("risk evaluation error: {}", e),
                    correlation_id,
                )
            }
        };

        if !decision.approved {
            return OrderResult::failure(
                &alert.symbol,
                OrderStatus::Rejected,
                format!(
                    "risk guard rejected: {}",
                    decision.reason.unwrap_or_default()
                ),
                correlation_id,
            );
        }

        info!(
            "🖐️ [ORCHESTRATOR] Manual trade {} {} x{}",
            alert.direction, alert.symbol, decision.position_size
        );
        let side = decision
            .side
            .unwrap_or_else(|| OrderSide::for_direction(alert.direction));
        self.execution
            .execute_as(&alert, side, decision.position_size, &correlation_id)
            .await
    }

    fn notify_alert(&self, alert: &Alert) {
        for (i, callback) in self.alert_callbacks.iter().enumerate() {
            isolate("alert", i, || callback(alert));
        }
    }

    fn notify_order(&self, result: &OrderResult) {
        for (i, callback) in self.order_callbacks.iter().enumerate() {
            isolate("order", i, || callback(result));
        }
    }
}

enum RiskOutcome {
    Approved(OrderSide, u64),
    Rejected,
    Failed,
}

fn isolate(kind: &str, index: usize, call: impl FnOnce() -> Result<(), CallbackError>) {
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("❌ [ORCHESTRATOR] {} callback #{} failed: {}", kind, index, e),
        Err(_) => error!("💥 [ORCHESTRATOR] {} callback #{} panicked", kind, index),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
