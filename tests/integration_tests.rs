//! Integration tests for the alert pipeline.
//! These tests drive the public API end to end with in-memory doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use rust_alert_trader::bus::EventBus;
use rust_alert_trader::clock::ManualClock;
use rust_alert_trader::config::{AppConfig, CircuitBreakerConfig, RetryConfig};
use rust_alert_trader::error::{BackendError, GatewayError};
use rust_alert_trader::events::{
    AccountSnapshot, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderStatusRecord, PositionSnapshot,
};
use rust_alert_trader::exchange::{BackendResult, ExecutionBackend, StaticAccountProvider};
use rust_alert_trader::gateway::{ConnectionState, GatewayConnection, GatewayEvent, SessionSettings, Transport};
use rust_alert_trader::ingest::{Deduplicator, MessageProcessor};
use rust_alert_trader::runtime::{dispatch_loop, ingest_callback};
use rust_alert_trader::services::stats_reporter::BreakerStates;
use rust_alert_trader::Orchestrator;

const NQ_ALERT: &str = "Bullish Bias\nDetected Symbol: NQ\nPrice: 19656.00\nStrategy: Test (ID 3)";
const CHEAP_ALERT: &str = "Bullish Bias\nDetected Symbol: NQ\nPrice: 100.00\nStrategy: Test (ID 3)";

/// Backend that records every order and fails the first `failures` calls.
#[derive(Default)]
struct RecordingBackend {
    orders: Mutex<Vec<OrderRequest>>,
    calls: AtomicU32,
    failures: AtomicU32,
}

impl RecordingBackend {
    fn failing(n: u32) -> Self {
        let backend = Self::default();
        backend.failures.store(n, Ordering::SeqCst);
        backend
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn connect(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn place_order(&self, order: OrderRequest) -> BackendResult<OrderResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(order.clone());

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Rejected {
                reason: "exchange unavailable".to_string(),
            });
        }

        Ok(OrderResult {
            success: true,
            symbol: order.symbol,
            order_id: Some(format!("ord-{}", self.calls())),
            filled_price: Some(100.0),
            filled_quantity: Some(order.quantity),
            status: OrderStatus::Filled,
            error: None,
            execution_time_ms: None,
            correlation_id: order.correlation_id,
        })
    }

    async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
        Ok(AccountSnapshot::with_balance(100_000.0))
    }

    async fn get_positions(&self) -> BackendResult<HashMap<String, PositionSnapshot>> {
        Ok(HashMap::new())
    }

    async fn get_order_status(&self, order_id: &str) -> BackendResult<OrderStatusRecord> {
        Ok(OrderStatusRecord::not_found(order_id))
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.execution.retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        backoff_factor: 2.0,
        max_delay_ms: 5,
        jitter: false,
    };
    config.execution.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout_secs: 60,
        half_open_max_calls: 1,
    };
    config
}

fn pipeline(backend: Arc<RecordingBackend>) -> (Orchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        backend,
        Arc::new(StaticAccountProvider::with_balance(100_000.0)),
        clock.clone(),
    );
    (orchestrator, clock)
}

fn message(id: &str, channel: &str, content: &str) -> GatewayEvent {
    GatewayEvent {
        event_type: "MESSAGE_CREATE".to_string(),
        sequence: None,
        data: json!({
            "id": id,
            "channel_id": channel,
            "content": content,
            "author": {"id": "42", "username": "signals"},
            "timestamp": "2025-01-01T00:00:00+00:00"
        }),
    }
}

// ============= End-to-End Scenario Tests =============

/// An index future at $19,656 with 2% of $100k sizes to zero shares.
#[tokio::test]
async fn test_expensive_alert_is_rejected_without_order() {
    let backend = Arc::new(RecordingBackend::default());
    let (mut orchestrator, _) = pipeline(backend.clone());

    assert!(!orchestrator.handle(NQ_ALERT, HashMap::new()).await);

    assert_eq!(backend.calls(), 0);
    let stats = orchestrator.stats();
    assert_eq!(stats.alerts_rejected, 1);
    assert_eq!(stats.orders_placed, 0);
}

#[tokio::test]
async fn test_affordable_alert_places_twenty_share_buy() {
    let backend = Arc::new(RecordingBackend::default());
    let (mut orchestrator, _) = pipeline(backend.clone());

    assert!(orchestrator.handle(CHEAP_ALERT, HashMap::new()).await);

    let orders = backend.orders.lock().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "NQ");
    assert_eq!(orders[0].quantity, 20);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].strategy_id, "3");
    assert!(!orders[0].correlation_id.is_empty());
}

#[tokio::test]
async fn test_circuit_opens_after_three_failures() {
    let backend = Arc::new(RecordingBackend::failing(10));
    let (mut orchestrator, clock) = pipeline(backend.clone());
    orchestrator.risk_guard_mut().set_risk_parameters(rust_alert_trader::services::RiskParameterUpdate {
        cooldown_secs: Some(0),
        ..Default::default()
    });

    for symbol in ["AAA", "BBB", "CCC"] {
        let text = CHEAP_ALERT.replace("NQ", symbol);
        assert!(!orchestrator.handle(&text, HashMap::new()).await);
    }
    assert_eq!(backend.calls(), 3);

    let text = CHEAP_ALERT.replace("NQ", "DDD");
    assert!(!orchestrator.handle(&text, HashMap::new()).await);
    assert_eq!(backend.calls(), 3);

    let stats = orchestrator.stats();
    assert_eq!(stats.orders_failed, 4);
    assert_eq!(stats.execution.failed_trades, 4);

    // After the reset timeout exactly one trial reaches the backend
    clock.advance(Duration::from_secs(61));
    let text = CHEAP_ALERT.replace("NQ", "EEE");
    assert!(!orchestrator.handle(&text, HashMap::new()).await);
    assert_eq!(backend.calls(), 4);

    let text = CHEAP_ALERT.replace("NQ", "FFF");
    assert!(!orchestrator.handle(&text, HashMap::new()).await);
    assert_eq!(backend.calls(), 4);
}

// ============= Pipeline Property Tests =============

#[tokio::test]
async fn test_seen_message_ids_never_reach_orchestrator() {
    let backend = Arc::new(RecordingBackend::default());
    let (mut orchestrator, _) = pipeline(backend.clone());
    let mut processor = MessageProcessor::new(Vec::new(), Vec::new(), true, Deduplicator::new(10));

    let first = message("m1", "c1", CHEAP_ALERT);
    let replay = message("m1", "c1", CHEAP_ALERT);

    let mut forwarded = Vec::new();
    for event in [first, replay] {
        if let Some(raw) = processor.process(&event) {
            forwarded.push(raw);
        }
    }
    assert_eq!(forwarded.len(), 1);

    for raw in forwarded {
        orchestrator.handle(&raw.content, raw.metadata()).await;
    }
    assert_eq!(orchestrator.stats().alerts_received, 1);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_identical_content_executes_once_within_window() {
    let backend = Arc::new(RecordingBackend::default());
    let (mut orchestrator, _) = pipeline(backend.clone());

    assert!(orchestrator.handle(CHEAP_ALERT, HashMap::new()).await);
    assert!(!orchestrator.handle(CHEAP_ALERT, HashMap::new()).await);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_blacklisted_and_invalid_price_never_execute() {
    let backend = Arc::new(RecordingBackend::default());
    let mut config = test_config();
    config.risk.blacklisted_symbols = vec!["NQ".to_string()];
    let orchestrator_clock = Arc::new(ManualClock::new());
    let mut orchestrator = Orchestrator::new(
        config,
        backend.clone(),
        Arc::new(StaticAccountProvider::with_balance(100_000.0)),
        orchestrator_clock,
    );

    assert!(!orchestrator.handle(CHEAP_ALERT, HashMap::new()).await);
    let zero_price = "Bullish Bias\nDetected Symbol: ES\nPrice: 0.00";
    assert!(!orchestrator.handle(zero_price, HashMap::new()).await);

    assert_eq!(backend.calls(), 0);
    let stats = orchestrator.stats();
    assert_eq!(stats.alerts_rejected, 1);
    assert_eq!(stats.alerts_failed, 1);
}

// ============= Gateway Flow Tests =============

enum Script {
    Frame(String),
    Close,
}

struct ScriptedTransport {
    inbound: mpsc::UnboundedReceiver<Script>,
    sent: Arc<Mutex<Vec<String>>>,
    open: bool,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> Result<(), GatewayError> {
        self.open = true;
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<(), GatewayError> {
        if !self.open {
            return Err(GatewayError::NotOpen);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        match self.inbound.recv().await {
            Some(Script::Frame(text)) => Some(Ok(text)),
            Some(Script::Close) | None => None,
        }
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn dispatch_frame(seq: u64, event_type: &str, data: serde_json::Value) -> String {
    json!({"op": 0, "s": seq, "t": event_type, "d": data}).to_string()
}

#[tokio::test]
async fn test_gateway_messages_flow_to_orders() {
    let backend = Arc::new(RecordingBackend::default());
    let (orchestrator, _) = pipeline(backend.clone());
    let stats = orchestrator.stats_handle();

    let mut config = test_config();
    config.listener.token = "token".to_string();
    config.listener.channel_ids = vec!["signals".to_string()];

    let (bus, rx) = EventBus::new();
    let breakers: BreakerStates = Arc::new(Mutex::new(HashMap::new()));
    let dispatcher = tokio::spawn(dispatch_loop(orchestrator, rx, breakers.clone()));

    let (peer, inbound) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = ScriptedTransport {
        inbound,
        sent: sent.clone(),
        open: false,
    };
    let connection = GatewayConnection::new(
        SessionSettings::from_listener(&config.listener),
        transport,
        ingest_callback(MessageProcessor::from_config(&config.listener), bus),
    );
    let handle = connection.spawn();

    let frames = [
        json!({"op": 10, "d": {"heartbeat_interval": 45000}}).to_string(),
        dispatch_frame(1, "READY", json!({"session_id": "s-1", "user": {"id": "me", "username": "bot"}})),
        dispatch_frame(2, "MESSAGE_CREATE", json!({
            "id": "1", "channel_id": "signals", "content": CHEAP_ALERT,
            "author": {"id": "42", "username": "alerts"}
        })),
        // Same message id again
        dispatch_frame(3, "MESSAGE_CREATE", json!({
            "id": "1", "channel_id": "signals", "content": CHEAP_ALERT,
            "author": {"id": "42", "username": "alerts"}
        })),
        // Wrong channel
        dispatch_frame(4, "MESSAGE_CREATE", json!({
            "id": "2", "channel_id": "general", "content": CHEAP_ALERT.replace("NQ", "ES"),
            "author": {"id": "42", "username": "alerts"}
        })),
        // Our own message
        dispatch_frame(5, "MESSAGE_CREATE", json!({
            "id": "3", "channel_id": "signals", "content": CHEAP_ALERT.replace("NQ", "YM"),
            "author": {"id": "me", "username": "bot"}
        })),
    ];
    for frame in frames {
        peer.send(Script::Frame(frame)).unwrap();
    }

    let mut state_rx = handle.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("gateway never connected")
    .expect("state channel closed");

    for _ in 0..200 {
        if stats.snapshot().alerts_received >= 1 && backend.calls() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.stop();
    handle.join().await.unwrap();
    let orchestrator = dispatcher.await.unwrap();
    drop(peer);

    let identify_sent = sent.lock().unwrap().iter().any(|t| t.contains("\"op\":2"));
    assert!(identify_sent);

    let stats = orchestrator.stats();
    assert_eq!(stats.alerts_received, 1);
    assert_eq!(stats.orders_placed, 1);
    assert_eq!(backend.calls(), 1);
    assert_eq!(backend.orders.lock().unwrap()[0].symbol, "NQ");
    assert!(breakers.lock().unwrap().contains_key("execute_trade"));
}
