//! Unit tests for ExecutionService composition: breaker, retry, backend.

#[cfg(test)]
mod execution_tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::clock::ManualClock;
    use crate::config::{CircuitBreakerConfig, ExecutionConfig, RetryConfig};
    use crate::error::BackendError;
    use crate::events::{
        AccountSnapshot, Alert, Direction, OrderRequest, OrderResult, OrderSide, OrderStatus,
        OrderStatusRecord, OrderType, PositionSnapshot,
    };
    use crate::exchange::{BackendResult, ExecutionBackend};
    use crate::resilience::CircuitState;
    use crate::services::execution::{apply_slippage, ExecutionService};

    /// Backend that replays scripted `place_order` outcomes, then fills.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<VecDeque<BackendResult<()>>>,
        orders: Mutex<Vec<OrderRequest>>,
        place_calls: AtomicU32,
        connect_calls: AtomicU32,
        fail_connect: bool,
    }

    impl ScriptedBackend {
        fn with_script(script: Vec<BackendResult<()>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.place_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn connect(&self) -> BackendResult<()> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                Err(BackendError::Transient("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self) -> BackendResult<()> {
            Ok(())
        }

        async fn place_order(&self, order: OrderRequest) -> BackendResult<OrderResult> {
            self.place_calls.fetch_add(1, Ordering::SeqCst);
            self.orders.lock().unwrap().push(order.clone());
            if let Some(Err(e)) = self.script.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(OrderResult {
                success: true,
                symbol: order.symbol,
                order_id: Some("order-1".to_string()),
                filled_price: order.limit_price.or(Some(100.0)),
                filled_quantity: Some(order.quantity),
                status: OrderStatus::Filled,
                error: None,
                execution_time_ms: None,
                correlation_id: order.correlation_id,
            })
        }

        async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
            Ok(AccountSnapshot::with_balance(50_000.0))
        }

        async fn get_positions(&self) -> BackendResult<HashMap<String, PositionSnapshot>> {
            Ok(HashMap::new())
        }

        async fn get_order_status(&self, order_id: &str) -> BackendResult<OrderStatusRecord> {
            Ok(OrderStatusRecord::not_found(order_id))
        }
    }

    fn fast_config() -> ExecutionConfig {
        ExecutionConfig {
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                backoff_factor: 2.0,
                max_delay_ms: 5,
                jitter: false,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_secs: 60,
                half_open_max_calls: 1,
            },
            ..ExecutionConfig::default()
        }
    }

    fn service(backend: Arc<ScriptedBackend>, config: ExecutionConfig) -> (ExecutionService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ExecutionService::new(backend, config, clock.clone()), clock)
    }

    fn buy(price: f64) -> Alert {
        Alert::new("AAPL", Some(price), Direction::Bullish)
    }

    // ============= Order Construction Tests =============

    #[test]
    fn test_apply_slippage_direction() {
        assert!((apply_slippage(100.0, OrderSide::Buy, 0.001) - 100.1).abs() < 1e-9);
        assert!((apply_slippage(100.0, OrderSide::Sell, 0.001) - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_market_order_has_no_price() {
        let (service, _) = service(Arc::new(ScriptedBackend::default()), fast_config());
        let order = service.build_order(&buy(100.0), 20, "c1").unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.quantity, 20);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.limit_price, None);
        assert_eq!(order.correlation_id, "c1");
    }

    #[test]
    fn test_limit_order_carries_slipped_price() {
        let config = ExecutionConfig {
            order_type: OrderType::Limit,
            ..fast_config()
        };
        let (service, _) = service(Arc::new(ScriptedBackend::default()), config);

        let sell = Alert::new("AAPL", Some(200.0), Direction::Bearish);
        let order = service.build_order(&sell, 5, "c1").unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert!((order.limit_price.unwrap() - 199.8).abs() < 1e-9);

        let no_price = Alert::new("AAPL", None, Direction::Bullish);
        assert!(matches!(
            service.build_order(&no_price, 5, "c1"),
            Err(BackendError::Validation(_))
        ));
    }

    #[test]
    fn test_short_sale_limit_slips_down() {
        let config = ExecutionConfig {
            order_type: OrderType::Limit,
            ..fast_config()
        };
        let (service, _) = service(Arc::new(ScriptedBackend::default()), config);

        let short = Alert::new("TSLA", Some(250.0), Direction::Bearish);
        let order = service
            .build_order_for(&short, OrderSide::SellShort, 4, "c1")
            .unwrap();
        assert_eq!(order.side, OrderSide::SellShort);
        assert!((order.limit_price.unwrap() - 249.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_execute_as_submits_chosen_side() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut service, _) = service(backend.clone(), fast_config());
        let bearish = Alert::new("TSLA", Some(250.0), Direction::Bearish);

        let opened = service.execute_as(&bearish, OrderSide::SellShort, 4, "c1").await;
        assert!(opened.success);
        let closed = service.execute(&bearish, 4, "c2").await;
        assert!(closed.success);

        let orders = backend.orders.lock().unwrap();
        assert_eq!(orders[0].side, OrderSide::SellShort);
        assert_eq!(orders[1].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_zero_quantity_never_reaches_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut service, _) = service(backend.clone(), fast_config());

        let result = service.execute(&buy(100.0), 0, "c1").await;
        assert!(!result.success);
        assert_eq!(result.status, OrderStatus::Rejected);
        assert_eq!(backend.calls(), 0);
        assert_eq!(service.stats().failed_trades, 1);
    }

    // ============= Execute Tests =============

    #[tokio::test]
    async fn test_execute_success_auto_connects() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut service, _) = service(backend.clone(), fast_config());
        assert!(!service.is_connected());

        let result = service.execute(&buy(100.0), 20, "corr-42").await;
        assert!(result.success);
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.correlation_id, "corr-42");
        assert!(result.execution_time_ms.is_some());
        assert!(service.is_connected());
        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 1);

        let orders = backend.orders.lock().unwrap();
        assert_eq!(orders[0].quantity, 20);
        assert_eq!(orders[0].side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn test_failed_auto_connect_skips_backend() {
        let backend = Arc::new(ScriptedBackend {
            fail_connect: true,
            ..ScriptedBackend::default()
        });
        let (mut service, _) = service(backend.clone(), fast_config());

        let result = service.execute(&buy(100.0), 1, "c1").await;
        assert!(!result.success);
        assert_eq!(result.status, OrderStatus::Failed);
        assert_eq!(backend.calls(), 0);
        assert_eq!(service.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![
            Err(BackendError::Transient("blip".to_string())),
            Err(BackendError::Timeout { timeout_ms: 10 }),
        ]));
        let (mut service, _) = service(backend.clone(), fast_config());

        let result = service.execute(&buy(100.0), 1, "c1").await;
        assert!(result.success);
        assert_eq!(backend.calls(), 3);
        assert_eq!(service.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_once() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![Err(BackendError::Rejected {
            reason: "insufficient funds".to_string(),
        })]));
        let (mut service, _) = service(backend.clone(), fast_config());

        let result = service.execute(&buy(100.0), 1, "c1").await;
        assert!(!result.success);
        assert_eq!(result.status, OrderStatus::Rejected);
        assert!(result.error.unwrap().contains("insufficient funds"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_counts_one_breaker_failure() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![
            Err(BackendError::Transient("1".to_string())),
            Err(BackendError::Transient("2".to_string())),
            Err(BackendError::Transient("3".to_string())),
        ]));
        let (mut service, _) = service(backend.clone(), fast_config());

        let result = service.execute(&buy(100.0), 1, "c1").await;
        assert!(!result.success);
        assert_eq!(result.status, OrderStatus::Failed);
        assert_eq!(backend.calls(), 3);
        assert_eq!(service.circuit_state(), CircuitState::Closed);
    }

    // ============= Circuit Breaker Tests =============

    #[tokio::test]
    async fn test_circuit_opens_and_recovers() {
        let rejected = || BackendError::Rejected {
            reason: "no".to_string(),
        };
        let backend = Arc::new(ScriptedBackend::with_script(vec![
            Err(rejected()),
            Err(rejected()),
            Err(rejected()),
        ]));
        let (mut service, clock) = service(backend.clone(), fast_config());

        for _ in 0..3 {
            assert!(!service.execute(&buy(100.0), 1, "c1").await.success);
        }
        assert_eq!(service.circuit_state(), CircuitState::Open);

        let blocked = service.execute(&buy(100.0), 1, "c4").await;
        assert_eq!(blocked.status, OrderStatus::CircuitOpen);
        assert_eq!(backend.calls(), 3);

        clock.advance(Duration::from_secs(61));
        let trial = service.execute(&buy(100.0), 1, "c5").await;
        assert!(trial.success);
        assert_eq!(service.circuit_state(), CircuitState::Closed);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn test_unsuccessful_result_does_not_trip_breaker() {
        struct RefusingBackend;

        #[async_trait]
        impl ExecutionBackend for RefusingBackend {
            fn name(&self) -> &'static str {
                "refusing"
            }
            async fn connect(&self) -> BackendResult<()> {
                Ok(())
            }
            async fn disconnect(&self) -> BackendResult<()> {
                Ok(())
            }
            async fn place_order(&self, order: OrderRequest) -> BackendResult<OrderResult> {
                Ok(OrderResult::failure(
                    order.symbol,
                    OrderStatus::Rejected,
                    "market closed",
                    order.correlation_id,
                ))
            }
            async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
                Ok(AccountSnapshot::default())
            }
            async fn get_positions(&self) -> BackendResult<HashMap<String, PositionSnapshot>> {
                Ok(HashMap::new())
            }
            async fn get_order_status(&self, order_id: &str) -> BackendResult<OrderStatusRecord> {
                Ok(OrderStatusRecord::not_found(order_id))
            }
        }

        let clock = Arc::new(ManualClock::new());
        let mut service = ExecutionService::new(Arc::new(RefusingBackend), fast_config(), clock);
        for _ in 0..5 {
            let result = service.execute(&buy(100.0), 1, "c").await;
            assert_eq!(result.status, OrderStatus::Rejected);
        }
        assert_eq!(service.circuit_state(), CircuitState::Closed);
        assert_eq!(service.stats().failed_trades, 5);
    }

    // ============= Stats Tests =============

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![
            Ok(()),
            Err(BackendError::Validation("bad".to_string())),
        ]));
        let (mut service, _) = service(backend, fast_config());

        service.execute(&buy(100.0), 1, "a").await;
        service.execute(&buy(100.0), 1, "b").await;
        service.execute(&buy(100.0), 1, "c").await;

        let stats = service.stats();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.successful_trades, 2);
        assert_eq!(stats.failed_trades, 1);
        assert!(stats.avg_execution_time_ms >= 0.0);
    }

    // ============= Pass-through Tests =============

    #[tokio::test]
    async fn test_queries_auto_connect() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut service, _) = service(backend.clone(), fast_config());

        assert_eq!(service.get_account_info().await.unwrap().balance, 50_000.0);
        assert!(service.get_positions().await.unwrap().is_empty());
        assert_eq!(
            service.get_order_status("x").await.unwrap().status,
            OrderStatus::NotFound
        );
        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 1);

        service.disconnect().await;
        assert!(!service.is_connected());
    }

    #[tokio::test]
    async fn test_queries_fail_without_auto_connect() {
        let config = ExecutionConfig {
            auto_connect: false,
            ..fast_config()
        };
        let (mut service, _) = service(Arc::new(ScriptedBackend::default()), config);
        assert_eq!(service.get_positions().await.unwrap_err(), BackendError::NotConnected);
        assert!(service.connect().await);
        assert!(service.get_positions().await.is_ok());
    }
}
