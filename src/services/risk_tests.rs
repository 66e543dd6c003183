//! Unit tests for RiskGuard checks, sizing and stateful tables.

#[cfg(test)]
mod risk_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::clock::ManualClock;
    use crate::config::{RiskConfig, ShortSellingPolicy};
    use crate::error::BackendError;
    use crate::events::{AccountSnapshot, Alert, Direction, OrderSide, PositionSnapshot};
    use crate::exchange::{AccountProvider, BackendResult, StaticAccountProvider};
    use crate::services::risk::{RiskGuard, RiskParameterUpdate};

    struct FailingProvider;

    #[async_trait]
    impl AccountProvider for FailingProvider {
        async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
            Err(BackendError::Transient("account service down".to_string()))
        }
    }

    fn guard_with(config: RiskConfig, clock: Arc<ManualClock>) -> RiskGuard {
        RiskGuard::new(config, Arc::new(StaticAccountProvider::with_balance(100_000.0)), clock)
    }

    fn guard() -> (RiskGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (guard_with(RiskConfig::default(), clock.clone()), clock)
    }

    fn alert(symbol: &str, price: f64, direction: Direction) -> Alert {
        Alert::new(symbol, Some(price), direction)
    }

    fn account_with_positions(count: usize) -> AccountSnapshot {
        let mut account = AccountSnapshot::with_balance(100_000.0);
        for i in 0..count {
            account.positions.insert(
                format!("SYM{}", i),
                PositionSnapshot {
                    quantity: 10,
                    avg_price: 50.0,
                },
            );
        }
        account
    }

    // ============= Sizing Tests =============

    #[tokio::test]
    async fn test_sizing_rejects_expensive_instrument() {
        let (mut guard, _) = guard();
        let decision = guard
            .evaluate(&alert("NQ", 19656.00, Direction::Bullish))
            .await
            .unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.position_size, 0);
        assert!(decision.reason.unwrap().contains("position size is zero"));
    }

    #[tokio::test]
    async fn test_sizing_approves_affordable_instrument() {
        let (mut guard, _) = guard();
        let decision = guard
            .evaluate(&alert("NQ", 100.0, Direction::Bullish))
            .await
            .unwrap();
        assert!(decision.approved);
        assert_eq!(decision.position_size, 20);
        assert!((decision.risk_score - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_round_up_to_one_share() {
        let clock = Arc::new(ManualClock::new());
        let config = RiskConfig {
            round_up_to_one_share: true,
            ..RiskConfig::default()
        };
        let guard = guard_with(config, clock);
        assert_eq!(guard.position_size(Some(19656.0), 100_000.0), 1);
        assert_eq!(guard.position_size(Some(0.0), 100_000.0), 0);
        assert_eq!(guard.position_size(Some(100.0), 0.0), 0);
    }

    #[test]
    fn test_non_positive_price_sizes_to_zero() {
        let (guard, _) = guard();
        assert_eq!(guard.position_size(Some(0.0), 100_000.0), 0);
        assert_eq!(guard.position_size(Some(-5.0), 100_000.0), 0);
        assert_eq!(guard.position_size(None, 100_000.0), 0);
        assert_eq!(guard.position_size(Some(f64::NAN), 100_000.0), 0);
    }

    #[tokio::test]
    async fn test_zero_price_rejected() {
        let (mut guard, _) = guard();
        let decision = guard
            .evaluate(&alert("AAPL", 0.0, Direction::Bullish))
            .await
            .unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.position_size, 0);
    }

    // ============= Blacklist Tests =============

    #[tokio::test]
    async fn test_blacklist_from_config_and_mutators() {
        let clock = Arc::new(ManualClock::new());
        let config = RiskConfig {
            blacklisted_symbols: vec!["gme".to_string()],
            ..RiskConfig::default()
        };
        let mut guard = guard_with(config, clock);

        let decision = guard.evaluate(&alert("GME", 10.0, Direction::Bullish)).await.unwrap();
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().contains("blacklisted"));

        guard.add_to_blacklist("amc");
        assert!(guard.is_blacklisted("AMC"));
        assert!(!guard.evaluate(&alert("AMC", 10.0, Direction::Bullish)).await.unwrap().approved);

        assert!(guard.remove_from_blacklist("AMC"));
        assert!(guard.evaluate(&alert("AMC", 10.0, Direction::Bullish)).await.unwrap().approved);
    }

    #[tokio::test]
    async fn test_blacklist_checked_before_account_fetch() {
        let clock = Arc::new(ManualClock::new());
        let config = RiskConfig {
            blacklisted_symbols: vec!["GME".to_string()],
            ..RiskConfig::default()
        };
        let mut guard = RiskGuard::new(config, Arc::new(FailingProvider), clock);

        let decision = guard.evaluate(&alert("GME", 10.0, Direction::Bullish)).await.unwrap();
        assert!(!decision.approved);
    }

    // ============= Cooldown Tests =============

    #[tokio::test]
    async fn test_cooldown_blocks_same_symbol_and_direction() {
        let (mut guard, clock) = guard();
        let buy = alert("AAPL", 100.0, Direction::Bullish);

        assert!(guard.evaluate(&buy).await.unwrap().approved);

        let second = guard.evaluate(&buy).await.unwrap();
        assert!(!second.approved);
        assert!(second.reason.unwrap().contains("cooldown"));

        // Opposite direction has its own cooldown entry
        assert!(guard
            .evaluate(&alert("AAPL", 100.0, Direction::Bearish))
            .await
            .unwrap()
            .approved);

        clock.advance(Duration::from_secs(301));
        assert!(guard.evaluate(&buy).await.unwrap().approved);
    }

    #[tokio::test]
    async fn test_rejection_does_not_start_cooldown() {
        let (mut guard, _) = guard();
        assert!(!guard.evaluate(&alert("NQ", 19656.0, Direction::Bullish)).await.unwrap().approved);
        assert_eq!(guard.cooldown_entries(), 0);
        assert!(guard.evaluate(&alert("NQ", 100.0, Direction::Bullish)).await.unwrap().approved);
    }

    #[tokio::test]
    async fn test_expired_cooldowns_pruned() {
        let (mut guard, clock) = guard();
        guard.evaluate(&alert("AAPL", 100.0, Direction::Bullish)).await.unwrap();
        guard.evaluate(&alert("MSFT", 100.0, Direction::Bullish)).await.unwrap();
        assert_eq!(guard.cooldown_entries(), 2);

        clock.advance(Duration::from_secs(600));
        guard.evaluate(&alert("TSLA", 100.0, Direction::Bullish)).await.unwrap();
        assert_eq!(guard.cooldown_entries(), 1);
    }

    // ============= Daily P&L Tests =============

    #[test]
    fn test_daily_loss_limit() {
        let (mut guard, _) = guard();
        let account = AccountSnapshot::with_balance(100_000.0);

        guard.update_daily_pnl(-4_000.0);
        assert!(guard
            .evaluate_with_account(&alert("AAPL", 100.0, Direction::Bullish), &account)
            .approved);

        guard.update_daily_pnl(-1_500.0);
        let decision = guard.evaluate_with_account(&alert("MSFT", 100.0, Direction::Bullish), &account);
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().contains("daily loss limit"));
    }

    #[test]
    fn test_daily_pnl_resets_on_new_day() {
        let (mut guard, clock) = guard();
        guard.update_daily_pnl(-10_000.0);
        assert_eq!(guard.daily_pnl(), -10_000.0);

        clock.advance_day();
        assert_eq!(guard.daily_pnl(), 0.0);

        let decision = guard.evaluate_with_account(
            &alert("AAPL", 100.0, Direction::Bullish),
            &AccountSnapshot::with_balance(100_000.0),
        );
        assert!(decision.approved);
        assert_eq!(decision.side, Some(OrderSide::Buy));
    }

    // ============= Position Limit Tests =============

    #[test]
    fn test_max_open_positions() {
        let (mut guard, _) = guard();
        let decision = guard.evaluate_with_account(
            &alert("AAPL", 100.0, Direction::Bullish),
            &account_with_positions(5),
        );
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().contains("max open positions"));

        let decision = guard.evaluate_with_account(
            &alert("AAPL", 100.0, Direction::Bullish),
            &account_with_positions(4),
        );
        assert!(decision.approved);
    }

    #[test]
    fn test_flat_positions_do_not_count() {
        let (mut guard, _) = guard();
        let mut account = account_with_positions(4);
        account.positions.insert(
            "FLAT".to_string(),
            PositionSnapshot {
                quantity: 0,
                avg_price: 1.0,
            },
        );
        assert!(guard
            .evaluate_with_account(&alert("AAPL", 100.0, Direction::Bullish), &account)
            .approved);
    }

    // ============= Short Selling Tests =============

    #[test]
    fn test_bearish_allowed_by_default() {
        let (mut guard, _) = guard();
        let decision = guard.evaluate_with_account(
            &alert("TSLA", 100.0, Direction::Bearish),
            &AccountSnapshot::with_balance(100_000.0),
        );
        assert!(decision.approved);
        assert_eq!(decision.side, Some(OrderSide::SellShort));
    }

    #[test]
    fn test_order_side_follows_position() {
        let (mut guard, _) = guard();
        let long = AccountSnapshot {
            positions: HashMap::from([(
                "AMD".to_string(),
                PositionSnapshot {
                    quantity: 15,
                    avg_price: 95.0,
                },
            )]),
            ..AccountSnapshot::with_balance(100_000.0)
        };

        // Bearish against a long position closes it
        let closing = guard.evaluate_with_account(&alert("amd", 100.0, Direction::Bearish), &long);
        assert_eq!(closing.side, Some(OrderSide::Sell));

        let buying = guard.evaluate_with_account(&alert("AMD", 100.0, Direction::Bullish), &long);
        assert_eq!(buying.side, Some(OrderSide::Buy));

        // A short position is not a long one
        let short = AccountSnapshot {
            positions: HashMap::from([(
                "NVDA".to_string(),
                PositionSnapshot {
                    quantity: -3,
                    avg_price: 100.0,
                },
            )]),
            ..AccountSnapshot::with_balance(100_000.0)
        };
        let adding = guard.evaluate_with_account(&alert("NVDA", 100.0, Direction::Bearish), &short);
        assert_eq!(adding.side, Some(OrderSide::SellShort));

        let rejected = guard.evaluate_with_account(&alert("NQ", 19656.0, Direction::Bearish), &long);
        assert!(rejected.side.is_none());
    }

    #[test]
    fn test_require_position_policy() {
        let clock = Arc::new(ManualClock::new());
        let config = RiskConfig {
            short_selling: ShortSellingPolicy::RequirePosition,
            ..RiskConfig::default()
        };
        let mut guard = guard_with(config, clock);

        let flat = AccountSnapshot::with_balance(100_000.0);
        let decision = guard.evaluate_with_account(&alert("TSLA", 100.0, Direction::Bearish), &flat);
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().contains("short selling disabled"));

        let long = AccountSnapshot {
            positions: HashMap::from([(
                "TSLA".to_string(),
                PositionSnapshot {
                    quantity: 5,
                    avg_price: 90.0,
                },
            )]),
            ..AccountSnapshot::with_balance(100_000.0)
        };
        let decision = guard.evaluate_with_account(&alert("TSLA", 100.0, Direction::Bearish), &long);
        assert!(decision.approved);
        assert_eq!(decision.side, Some(OrderSide::Sell));
    }

    // ============= Provider and Parameter Tests =============

    #[tokio::test]
    async fn test_provider_failure_is_error() {
        let clock = Arc::new(ManualClock::new());
        let mut guard = RiskGuard::new(RiskConfig::default(), Arc::new(FailingProvider), clock);
        let result = guard.evaluate(&alert("AAPL", 100.0, Direction::Bullish)).await;
        assert!(matches!(result, Err(BackendError::Transient(_))));
    }

    #[tokio::test]
    async fn test_set_risk_parameters_takes_effect() {
        let (mut guard, _) = guard();
        guard.set_risk_parameters(RiskParameterUpdate {
            max_position_size: Some(0.05),
            cooldown_secs: Some(0),
            ..RiskParameterUpdate::default()
        });
        assert_eq!(guard.parameters().max_position_size, 0.05);
        assert_eq!(guard.parameters().daily_loss_limit, 0.05);

        let decision = guard.evaluate(&alert("AAPL", 100.0, Direction::Bullish)).await.unwrap();
        assert_eq!(decision.position_size, 50);

        // Zero cooldown never blocks
        assert!(guard.evaluate(&alert("AAPL", 100.0, Direction::Bullish)).await.unwrap().approved);
    }
}
