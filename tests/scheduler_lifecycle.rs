//! Cross-module integration: the Scheduler drives a registered strategy
//! through its full lifecycle and routes its signals through the RiskGate
//! to a concrete (mock) ExecutionPort, landing fills in the TradeLogger.

use async_trait::async_trait;
use betterbot_core::error::CoreResult;
use betterbot_core::models::{
    BotState, MarketMetadata, MarketTriple, RiskLimits, Signal, SignalType, StrategyConfig,
    StrategyContext,
};
use betterbot_core::ports::{
    ExecutionPort, MarketDataPort, OrderResult, OrderSpec, OrderStatus, PortfolioProvider,
    PortfolioSnapshot,
};
use betterbot_core::scheduler::{Scheduler, SchedulerDeps, SchedulerEvent, Strategy};
use betterbot_core::trade_logger::TradeLogger;
use betterbot_core::trade_store::{TradeFilter, TradeStore};
use std::sync::Arc;
use std::time::Duration;

struct NullMarketData;

#[async_trait]
impl MarketDataPort for NullMarketData {
    async fn get_market(&self, _triple: &MarketTriple) -> CoreResult<MarketMetadata> {
        Ok(MarketMetadata::default())
    }
    async fn get_price(&self, _triple: &MarketTriple) -> CoreResult<Option<f64>> {
        Ok(Some(0.5))
    }
}

struct FixedPortfolio;

#[async_trait]
impl PortfolioProvider for FixedPortfolio {
    async fn snapshot(&self) -> CoreResult<PortfolioSnapshot> {
        Ok(PortfolioSnapshot {
            value: 10_000.0,
            balance: 10_000.0,
            positions: vec![],
        })
    }
}

struct AlwaysFillExecution;

#[async_trait]
impl ExecutionPort for AlwaysFillExecution {
    async fn place_order(&self, spec: OrderSpec) -> CoreResult<OrderResult> {
        Ok(OrderResult {
            success: true,
            order_id: Some("order-1".to_string()),
            status: OrderStatus::Filled,
            filled_size: spec.size,
            avg_fill_price: spec.price.unwrap_or(0.5),
            error: None,
        })
    }
    async fn cancel_order(&self, _order_id: &str) -> CoreResult<bool> {
        Ok(true)
    }
    async fn get_order_status(&self, _order_id: &str) -> CoreResult<Option<OrderStatus>> {
        Ok(Some(OrderStatus::Filled))
    }
}

struct AlwaysBuyStrategy;

#[async_trait]
impl Strategy for AlwaysBuyStrategy {
    async fn evaluate(&mut self, _ctx: &StrategyContext) -> CoreResult<Vec<Signal>> {
        Ok(vec![Signal {
            signal_type: SignalType::Buy,
            venue: betterbot_core::models::Venue::from("polymarket"),
            market_id: "market-1".to_string(),
            outcome: "yes".to_string(),
            price: Some(0.5),
            size: Some(10.0),
            size_pct: None,
            confidence: None,
            reason: None,
            meta: serde_json::json!({}),
        }])
    }
}

fn scheduler() -> (Scheduler, Arc<TradeLogger>) {
    let store = TradeStore::in_memory().unwrap();
    let logger = Arc::new(TradeLogger::new(Arc::new(store)));
    let scheduler = Scheduler::new(SchedulerDeps {
        trade_logger: logger.clone(),
        portfolio: Arc::new(FixedPortfolio),
        execution: Arc::new(AlwaysFillExecution),
        market_data: Arc::new(NullMarketData),
        price_history_size: 200,
        recent_trades_cap: 50,
    });
    (scheduler, logger)
}

fn config() -> StrategyConfig {
    StrategyConfig {
        id: "always-buy".to_string(),
        name: "always buy".to_string(),
        description: String::new(),
        venues: vec![betterbot_core::models::Venue::from("polymarket")],
        market_filter: None,
        interval_ms: 30,
        limits: RiskLimits::default(),
        enabled: true,
        dry_run: false,
        params: serde_json::json!({}),
    }
}

#[tokio::test]
async fn start_bot_runs_immediate_tick_and_transitions_to_running() {
    let (scheduler, logger) = scheduler();
    scheduler
        .register_strategy(config(), Box::new(AlwaysBuyStrategy))
        .await
        .unwrap();

    scheduler.start_bot("always-buy").await.unwrap();
    // Give the immediate tick's dispatch a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = scheduler.get_bot_status("always-buy").await.unwrap();
    assert_eq!(status.state, BotState::Running);
    assert!(status.started_at.is_some());

    let trades = logger.get_trades(&TradeFilter::default()).await.unwrap();
    assert!(!trades.is_empty());

    scheduler.stop_bot("always-buy").await.unwrap();
}

#[tokio::test]
async fn stop_bot_cancels_the_interval_task() {
    let (scheduler, logger) = scheduler();
    scheduler
        .register_strategy(config(), Box::new(AlwaysBuyStrategy))
        .await
        .unwrap();
    scheduler.start_bot("always-buy").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.stop_bot("always-buy").await.unwrap();

    let trades_at_stop = logger.get_trades(&TradeFilter::default()).await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let trades_after_wait = logger.get_trades(&TradeFilter::default()).await.unwrap().len();

    assert_eq!(trades_at_stop, trades_after_wait);
    let status = scheduler.get_bot_status("always-buy").await.unwrap();
    assert_eq!(status.state, BotState::Stopped);
}

#[tokio::test]
async fn pause_bot_keeps_cadence_but_drops_dispatch() {
    let (scheduler, _logger) = scheduler();
    scheduler
        .register_strategy(config(), Box::new(AlwaysBuyStrategy))
        .await
        .unwrap();
    scheduler.start_bot("always-buy").await.unwrap();
    scheduler.pause_bot("always-buy").await.unwrap();

    let status = scheduler.get_bot_status("always-buy").await.unwrap();
    assert_eq!(status.state, BotState::Paused);

    scheduler.stop_bot("always-buy").await.unwrap();
}

#[tokio::test]
async fn reregistering_a_running_bot_emits_reregistered_event() {
    let (scheduler, _logger) = scheduler();
    let mut rx = scheduler.subscribe();
    scheduler
        .register_strategy(config(), Box::new(AlwaysBuyStrategy))
        .await
        .unwrap();
    scheduler.start_bot("always-buy").await.unwrap();

    scheduler
        .register_strategy(config(), Box::new(AlwaysBuyStrategy))
        .await
        .unwrap();

    let mut saw_reregistered = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, SchedulerEvent::Reregistered(id) if id == "always-buy") {
            saw_reregistered = true;
        }
    }
    assert!(saw_reregistered);
}
