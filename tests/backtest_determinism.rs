//! Cross-module integration: a backtest run is deterministic given the
//! same strategy and tick stream, and its metrics feed correctly into
//! Monte Carlo resampling.

use async_trait::async_trait;
use betterbot_core::backtest::{monte_carlo, BacktestConfig, BacktestEngine, Tick};
use betterbot_core::error::CoreResult;
use betterbot_core::models::{
    RiskLimits, Signal, SignalType, StrategyConfig, StrategyContext, Venue,
};
use betterbot_core::scheduler::Strategy;
use betterbot_core::trade_store::TradeFilter;
use chrono::Utc;

struct AlternatingStrategy {
    tick_index: u32,
}

#[async_trait]
impl Strategy for AlternatingStrategy {
    async fn evaluate(&mut self, ctx: &StrategyContext) -> CoreResult<Vec<Signal>> {
        self.tick_index += 1;
        let triple = match ctx.price_history.keys().next() {
            Some(t) => t.clone(),
            None => return Ok(vec![]),
        };
        let price = ctx.price_history[&triple].last().unwrap().1;
        let has_position = ctx.positions.contains_key(&triple);

        if !has_position && self.tick_index % 4 == 1 {
            return Ok(vec![Signal {
                signal_type: SignalType::Buy,
                venue: triple.venue,
                market_id: triple.market_id,
                outcome: triple.outcome,
                price: Some(price),
                size: Some(50.0),
                size_pct: None,
                confidence: None,
                reason: None,
                meta: serde_json::json!({}),
            }]);
        }
        if has_position && self.tick_index % 4 == 3 {
            return Ok(vec![Signal {
                signal_type: SignalType::Close,
                venue: triple.venue,
                market_id: triple.market_id,
                outcome: triple.outcome,
                price: Some(price),
                size: None,
                size_pct: None,
                confidence: None,
                reason: None,
                meta: serde_json::json!({}),
            }]);
        }
        Ok(vec![])
    }
}

fn strategy_config() -> StrategyConfig {
    StrategyConfig {
        id: "alternating".to_string(),
        name: "alternating".to_string(),
        description: String::new(),
        venues: vec![Venue::from("polymarket")],
        market_filter: None,
        interval_ms: 1000,
        limits: RiskLimits::default(),
        enabled: true,
        dry_run: false,
        params: serde_json::json!({}),
    }
}

fn sample_ticks() -> Vec<Tick> {
    let base = Utc::now();
    (0..40)
        .map(|i| Tick {
            time: base + chrono::Duration::minutes(i),
            venue: Venue::from("polymarket"),
            market_id: "market-1".to_string(),
            outcome: "yes".to_string(),
            price: 0.45 + (i as f64 * 0.37).sin() * 0.05,
        })
        .collect()
}

#[tokio::test]
async fn same_ticks_and_strategy_produce_identical_metrics() {
    let ticks = sample_ticks();
    let config = BacktestConfig {
        initial_capital: 10_000.0,
        commission_pct: 0.001,
        slippage_pct: 0.0005,
        eval_interval_ms: 0,
        ..Default::default()
    };

    let mut engine_a = BacktestEngine::new(config.clone(), strategy_config()).unwrap();
    let mut strategy_a = AlternatingStrategy { tick_index: 0 };
    let metrics_a = engine_a.run(&mut strategy_a, &ticks, &[]).await.unwrap();

    let mut engine_b = BacktestEngine::new(config, strategy_config()).unwrap();
    let mut strategy_b = AlternatingStrategy { tick_index: 0 };
    let metrics_b = engine_b.run(&mut strategy_b, &ticks, &[]).await.unwrap();

    assert_eq!(metrics_a.total_trades, metrics_b.total_trades);
    assert!((metrics_a.final_equity - metrics_b.final_equity).abs() < 1e-9);
    assert_eq!(metrics_a.daily_returns, metrics_b.daily_returns);
}

#[tokio::test]
async fn same_ticks_and_strategy_produce_identical_trade_ids_and_timestamps() {
    let ticks = sample_ticks();
    let config = BacktestConfig {
        initial_capital: 10_000.0,
        commission_pct: 0.001,
        slippage_pct: 0.0005,
        eval_interval_ms: 0,
        ..Default::default()
    };

    let mut engine_a = BacktestEngine::new(config.clone(), strategy_config()).unwrap();
    let mut strategy_a = AlternatingStrategy { tick_index: 0 };
    engine_a.run(&mut strategy_a, &ticks, &[]).await.unwrap();
    let trades_a = engine_a
        .logger()
        .get_trades(&TradeFilter {
            strategy_id: Some(strategy_config().id),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut engine_b = BacktestEngine::new(config, strategy_config()).unwrap();
    let mut strategy_b = AlternatingStrategy { tick_index: 0 };
    engine_b.run(&mut strategy_b, &ticks, &[]).await.unwrap();
    let trades_b = engine_b
        .logger()
        .get_trades(&TradeFilter {
            strategy_id: Some(strategy_config().id),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!trades_a.is_empty());
    assert_eq!(trades_a.len(), trades_b.len());
    for (a, b) in trades_a.iter().zip(trades_b.iter()) {
        assert_eq!(a.trade_id, b.trade_id);
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(a.filled_at, b.filled_at);
    }
}

#[tokio::test]
async fn monte_carlo_is_deterministic_given_same_seed_and_metrics() {
    let ticks = sample_ticks();
    let config = BacktestConfig {
        initial_capital: 10_000.0,
        eval_interval_ms: 0,
        ..Default::default()
    };
    let mut engine = BacktestEngine::new(config, strategy_config()).unwrap();
    let mut strategy = AlternatingStrategy { tick_index: 0 };
    let metrics = engine.run(&mut strategy, &ticks, &[]).await.unwrap();

    let run1 = monte_carlo(&metrics, 300, 7);
    let run2 = monte_carlo(&metrics, 300, 7);
    assert_eq!(run1.p50, run2.p50);
    assert_eq!(run1.expected_value, run2.expected_value);
}

#[tokio::test]
async fn ticks_out_of_order_are_rejected() {
    let mut ticks = sample_ticks();
    ticks.swap(0, 1);
    let config = BacktestConfig::default();
    let mut engine = BacktestEngine::new(config, strategy_config()).unwrap();
    let mut strategy = AlternatingStrategy { tick_index: 0 };
    let err = engine.run(&mut strategy, &ticks, &[]).await.unwrap_err();
    assert!(matches!(err, betterbot_core::error::CoreError::Invalid(_)));
}
