//! CopyTrader: subscribes to the `WhaleTracker`'s trade stream and
//! transforms whale trades into orders under a sizing/delay/filter policy
//! (spec.md §4.6).
//!
//! Grounded in the teacher's KOL-copy sketch (`kol_copy_strategy.rs` in
//! the wider example pack) for the follow-set / buffered-event shape, and
//! in `vault/trade_executor.rs` for the per-trade execution + logging
//! pattern.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::CoreResult;
use crate::models::{CopiedTrade, CopiedTradeStatus, MarketTriple, Side, WhaleTrade};
use crate::ports::{ExecutionPort, MarketDataPort, OrderSpec};
use crate::trade_logger::TradeLogger;
use crate::whale::WhaleEvent;

/// Cadence of the per-position stop-loss/take-profit price watch (step 8,
/// spec.md §4.6). Mirrors the poll cadence the whale tracker uses for its
/// own position reconciliation loop.
const PRICE_WATCH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Percentage move against/for `side` from `entry_price` to `current_price`,
/// signed so a gain is positive regardless of side. Returns the threshold
/// name crossed, if any; a `pct <= 0.0` disables that leg.
fn threshold_crossed(
    side: Side,
    entry_price: f64,
    current_price: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
) -> Option<&'static str> {
    if entry_price <= 0.0 {
        return None;
    }
    let change_pct = match side {
        Side::Buy => (current_price - entry_price) / entry_price * 100.0,
        Side::Sell => (entry_price - current_price) / entry_price * 100.0,
    };
    if stop_loss_pct > 0.0 && change_pct <= -stop_loss_pct {
        return Some("stop_loss");
    }
    if take_profit_pct > 0.0 && change_pct >= take_profit_pct {
        return Some("take_profit");
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingMode {
    Fixed,
    Proportional,
    Percentage,
}

#[derive(Debug, Clone)]
pub struct CopyTraderConfig {
    pub follow_set: HashSet<String>,
    pub excluded_markets: HashSet<String>,
    pub min_trade_size: f64,
    pub max_position_size: f64,
    pub sizing_mode: SizingMode,
    pub fixed_size: f64,
    pub proportion_multiplier: f64,
    pub portfolio_percentage: f64,
    pub copy_delay_ms: u64,
    pub max_slippage_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for CopyTraderConfig {
    fn default() -> Self {
        Self {
            follow_set: HashSet::new(),
            excluded_markets: HashSet::new(),
            min_trade_size: 10_000.0,
            max_position_size: 5_000.0,
            sizing_mode: SizingMode::Fixed,
            fixed_size: 100.0,
            proportion_multiplier: 0.01,
            portfolio_percentage: 1.0,
            copy_delay_ms: 5_000,
            max_slippage_pct: 1.0,
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
        }
    }
}

#[derive(Clone)]
pub enum CopyEvent {
    TradeCopied(CopiedTrade),
    TradeSkipped { trade: WhaleTrade, reason: String },
    PositionClosed { trade: CopiedTrade },
    Error(String),
}

struct CopyTraderState {
    open_positions: Vec<CopiedTrade>,
    total_skipped: u64,
}

pub struct CopyTrader {
    config: Mutex<CopyTraderConfig>,
    execution: Arc<dyn ExecutionPort>,
    market_data: Arc<dyn MarketDataPort>,
    trade_logger: Arc<TradeLogger>,
    portfolio_value: Mutex<f64>,
    state: Arc<Mutex<CopyTraderState>>,
    events: broadcast::Sender<CopyEvent>,
    /// Copy-delay timers and stop-loss/take-profit price watches share this
    /// list so `stop()` aborts every pending background task in one pass.
    pending_timers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CopyTrader {
    pub fn new(
        config: CopyTraderConfig,
        execution: Arc<dyn ExecutionPort>,
        market_data: Arc<dyn MarketDataPort>,
        trade_logger: Arc<TradeLogger>,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            config: Mutex::new(config),
            execution,
            market_data,
            trade_logger,
            portfolio_value: Mutex::new(0.0),
            state: Arc::new(Mutex::new(CopyTraderState {
                open_positions: Vec::new(),
                total_skipped: 0,
            })),
            events: tx,
            pending_timers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CopyEvent> {
        self.events.subscribe()
    }

    pub async fn set_portfolio_value(&self, value: f64) {
        *self.portfolio_value.lock().await = value;
    }

    /// Drives one incoming whale event through the six-step policy
    /// (spec.md §4.6). Only `WhaleEvent::Trade` is actionable; other event
    /// kinds are ignored.
    pub async fn on_whale_event(self: &Arc<Self>, event: WhaleEvent) {
        if let WhaleEvent::Trade(trade) = event {
            self.on_whale_trade(trade).await;
        }
    }

    async fn skip(&self, trade: WhaleTrade, reason: &str) {
        self.state.lock().await.total_skipped += 1;
        warn!(reason, "whale trade skipped");
        let _ = self.events.send(CopyEvent::TradeSkipped {
            trade,
            reason: reason.to_string(),
        });
    }

    pub async fn on_whale_trade(self: &Arc<Self>, trade: WhaleTrade) {
        let config = self.config.lock().await.clone();

        // 1. Follow check.
        if !config.follow_set.contains(&trade.maker) && !config.follow_set.contains(&trade.taker) {
            self.skip(trade, "address_not_followed").await;
            return;
        }

        // 2. Size check.
        if trade.usd_value < config.min_trade_size {
            self.skip(trade, "trade_too_small").await;
            return;
        }

        // 3. Market filter.
        if config.excluded_markets.contains(&trade.market_id) {
            self.skip(trade, "market_excluded").await;
            return;
        }

        // 4. Saturation.
        let already_saturated = {
            let state = self.state.lock().await;
            state
                .open_positions
                .iter()
                .filter(|p| p.market_id == trade.market_id)
                .any(|p| p.size * p.entry_price >= config.max_position_size)
        };
        if already_saturated {
            self.skip(trade, "max_position_reached").await;
            return;
        }

        // 5. Sizing.
        let portfolio_value = *self.portfolio_value.lock().await;
        let raw_size = match config.sizing_mode {
            SizingMode::Fixed => config.fixed_size,
            SizingMode::Proportional => trade.usd_value * config.proportion_multiplier,
            SizingMode::Percentage => portfolio_value * config.portfolio_percentage / 100.0,
        };
        let notional_cap_shares = if trade.price > 0.0 {
            config.max_position_size / trade.price
        } else {
            raw_size
        };
        let size = raw_size.min(notional_cap_shares);

        // 6. Delay: schedule execution after `copyDelayMs`.
        let this = self.clone();
        let delay = std::time::Duration::from_millis(config.copy_delay_ms);
        let trade_for_timer = trade.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.execute_copy(
                trade_for_timer,
                size,
                config.max_slippage_pct,
                config.stop_loss_pct,
                config.take_profit_pct,
            )
            .await;
        });
        self.pending_timers.lock().await.push(handle);
    }

    /// 7. Execute: places a limit order at
    /// `whale.price * (1 ± maxSlippage/100)`. 8. If stop-loss/take-profit is
    /// configured, arms a price watch over the opened position.
    async fn execute_copy(
        self: Arc<Self>,
        trade: WhaleTrade,
        size: f64,
        max_slippage_pct: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) {
        let slippage_sign = match trade.side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        let limit_price = trade.price * (1.0 + (max_slippage_pct / 100.0) * slippage_sign);

        let spec = OrderSpec {
            triple: crate::models::MarketTriple::new("__whale_venue__", trade.market_id.clone(), trade.outcome.clone()),
            side: trade.side,
            price: Some(limit_price),
            size,
            order_kind: crate::models::OrderKind::Limit,
            slippage_bound: Some(max_slippage_pct / 100.0),
        };

        match self.execution.place_order(spec).await {
            Ok(result) if result.success => {
                let copied = CopiedTrade {
                    original_trade_ref: trade.tx_hash.clone().unwrap_or_default(),
                    copied_at: chrono::Utc::now(),
                    side: trade.side,
                    size: result.filled_size,
                    entry_price: result.avg_fill_price,
                    exit_price: None,
                    status: CopiedTradeStatus::Open,
                    pnl: None,
                    order_handle: result.order_id.clone(),
                    market_id: trade.market_id.clone(),
                    outcome: trade.outcome.clone(),
                };
                self.state.lock().await.open_positions.push(copied.clone());
                let watch_market_id = copied.market_id.clone();
                let watch_outcome = copied.outcome.clone();
                let watch_entry_price = copied.entry_price;
                let watch_side = copied.side;

                let trade_spec = crate::models::TradeSpec {
                    venue: crate::models::Venue::from("__whale_venue__"),
                    market_id: trade.market_id,
                    outcome: trade.outcome,
                    side: trade.side,
                    order_kind: crate::models::OrderKind::Limit,
                    price: result.avg_fill_price,
                    size: result.filled_size,
                    strategy_id: Some("copy_trader".to_string()),
                    strategy_name: Some("CopyTrader".to_string()),
                    tags: vec!["copy".to_string()],
                    metadata: serde_json::json!({}),
                };
                if let Ok(logged) = self.trade_logger.log_trade(trade_spec).await {
                    let _ = self
                        .trade_logger
                        .fill_trade(&logged.trade_id, result.avg_fill_price, result.filled_size, None)
                        .await;
                }

                let _ = self.events.send(CopyEvent::TradeCopied(copied));

                if stop_loss_pct > 0.0 || take_profit_pct > 0.0 {
                    let watcher = self.clone();
                    let handle = tokio::spawn(async move {
                        watcher
                            .watch_position_thresholds(
                                watch_market_id,
                                watch_outcome,
                                watch_side,
                                watch_entry_price,
                                stop_loss_pct,
                                take_profit_pct,
                            )
                            .await;
                    });
                    self.pending_timers.lock().await.push(handle);
                }
            }
            Ok(result) => {
                error!(error = ?result.error, "copy order rejected by venue");
                let _ = self.events.send(CopyEvent::Error(
                    result.error.unwrap_or_else(|| "order rejected".to_string()),
                ));
            }
            Err(e) => {
                error!(error = %e, "copy order placement failed");
                let _ = self.events.send(CopyEvent::Error(e.to_string()));
            }
        }
    }

    /// Polls `market_data` on `PRICE_WATCH_INTERVAL` and closes the position
    /// the moment stop-loss or take-profit is crossed. Exits quietly once
    /// the position is no longer in `open_positions` (closed elsewhere, e.g.
    /// `close_all_positions`).
    async fn watch_position_thresholds(
        self: Arc<Self>,
        market_id: String,
        outcome: String,
        side: Side,
        entry_price: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) {
        let triple = MarketTriple::new("__whale_venue__", market_id.clone(), outcome.clone());
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + PRICE_WATCH_INTERVAL, PRICE_WATCH_INTERVAL);
        loop {
            interval.tick().await;

            let still_open = self
                .state
                .lock()
                .await
                .open_positions
                .iter()
                .any(|p| p.market_id == market_id && p.outcome == outcome);
            if !still_open {
                return;
            }

            let price = match self.market_data.get_price(&triple).await {
                Ok(Some(price)) => price,
                _ => continue,
            };

            if let Some(reason) =
                threshold_crossed(side, entry_price, price, stop_loss_pct, take_profit_pct)
            {
                self.close_position(&market_id, &outcome, reason).await;
                return;
            }
        }
    }

    /// Closes a single copied position by reference, emitting
    /// `PositionClosed`. Puts the position back if the close fails so a
    /// later watch tick or `close_all_positions` can retry.
    async fn close_position(&self, market_id: &str, outcome: &str, reason: &str) {
        let position = {
            let mut state = self.state.lock().await;
            let idx = state
                .open_positions
                .iter()
                .position(|p| p.market_id == market_id && p.outcome == outcome);
            match idx {
                Some(i) => state.open_positions.remove(i),
                None => return,
            }
        };

        let spec = OrderSpec {
            triple: MarketTriple::new("__whale_venue__", position.market_id.clone(), position.outcome.clone()),
            side: match position.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            },
            price: None,
            size: position.size,
            order_kind: crate::models::OrderKind::Market,
            slippage_bound: None,
        };

        match self.execution.place_order(spec).await {
            Ok(result) if result.success => {
                let mut position = position;
                position.status = CopiedTradeStatus::Closed;
                position.exit_price = Some(result.avg_fill_price);
                info!(market_id = %position.market_id, reason, "copied position closed by price watch");
                let _ = self.events.send(CopyEvent::PositionClosed { trade: position });
            }
            Ok(result) => {
                error!(error = ?result.error, reason, "price-watch close rejected");
                self.state.lock().await.open_positions.push(position);
            }
            Err(e) => {
                error!(error = %e, reason, "price-watch close failed");
                self.state.lock().await.open_positions.push(position);
            }
        }
    }

    /// Walks the open set sequentially; each close is serialised to avoid
    /// order storms against one venue.
    pub async fn close_all_positions(&self) {
        let positions = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.open_positions)
        };

        for mut position in positions {
            let spec = OrderSpec {
                triple: crate::models::MarketTriple::new(
                    "__whale_venue__",
                    position.market_id.clone(),
                    position.outcome.clone(),
                ),
                side: match position.side {
                    Side::Buy => Side::Sell,
                    Side::Sell => Side::Buy,
                },
                price: None,
                size: position.size,
                order_kind: crate::models::OrderKind::Market,
                slippage_bound: None,
            };
            match self.execution.place_order(spec).await {
                Ok(result) if result.success => {
                    position.status = CopiedTradeStatus::Closed;
                    position.exit_price = Some(result.avg_fill_price);
                    let _ = self.events.send(CopyEvent::PositionClosed { trade: position });
                }
                Ok(result) => {
                    error!(error = ?result.error, "position close rejected");
                }
                Err(e) => {
                    error!(error = %e, "position close failed");
                }
            }
        }
    }

    pub async fn open_positions(&self) -> Vec<CopiedTrade> {
        self.state.lock().await.open_positions.clone()
    }

    pub async fn total_skipped(&self) -> u64 {
        self.state.lock().await.total_skipped
    }

    /// Cancels every pending copy timer (`clearTimeout` on each in the
    /// source's idiom) so that after `stop()` returns, no pending copy
    /// timer fires.
    pub async fn stop(&self) {
        let mut timers = self.pending_timers.lock().await;
        for handle in timers.drain(..) {
            handle.abort();
        }
        info!("copy trader stopped, pending timers cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{MockExecutionPort, MockMarketDataPort};
    use crate::trade_store::TradeStore;

    fn whale_trade(usd_value: f64, maker: &str, taker: &str) -> WhaleTrade {
        WhaleTrade {
            timestamp: chrono::Utc::now(),
            market_id: "m1".to_string(),
            outcome: "yes".to_string(),
            side: Side::Buy,
            price: 0.5,
            size: usd_value / 0.5,
            usd_value,
            maker: maker.to_string(),
            taker: taker.to_string(),
            tx_hash: Some("0xabc".to_string()),
        }
    }

    fn trader() -> Arc<CopyTrader> {
        trader_with(CopyTraderConfig::default(), Arc::new(MockMarketDataPort::new()))
    }

    fn trader_with(mut config: CopyTraderConfig, market_data: Arc<MockMarketDataPort>) -> Arc<CopyTrader> {
        config.follow_set.insert("whale1".to_string());
        config.min_trade_size = 1_000.0;
        config.copy_delay_ms = 10;

        let execution = Arc::new(MockExecutionPort::default());
        let store = TradeStore::in_memory().unwrap();
        let logger = Arc::new(TradeLogger::new(Arc::new(store)));
        Arc::new(CopyTrader::new(config, execution, market_data, logger))
    }

    #[tokio::test]
    async fn skips_trade_below_min_size() {
        let trader = trader();
        let mut rx = trader.subscribe();
        trader.on_whale_trade(whale_trade(500.0, "whale1", "other")).await;

        let event = rx.recv().await.unwrap();
        match event {
            CopyEvent::TradeSkipped { reason, .. } => assert_eq!(reason, "trade_too_small"),
            other => panic!("expected TradeSkipped, got {other:?}"),
        }
        assert_eq!(trader.total_skipped().await, 1);
    }

    #[tokio::test]
    async fn skips_trade_from_unfollowed_address() {
        let trader = trader();
        let mut rx = trader.subscribe();
        trader.on_whale_trade(whale_trade(5_000.0, "stranger", "other")).await;

        let event = rx.recv().await.unwrap();
        match event {
            CopyEvent::TradeSkipped { reason, .. } => assert_eq!(reason, "address_not_followed"),
            other => panic!("expected TradeSkipped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn copies_followed_trade_after_delay() {
        let trader = trader();
        let mut rx = trader.subscribe();
        trader.on_whale_trade(whale_trade(5_000.0, "whale1", "other")).await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            CopyEvent::TradeCopied(copied) => assert_eq!(copied.market_id, "m1"),
            other => panic!("expected TradeCopied, got {other:?}"),
        }
        assert_eq!(trader.open_positions().await.len(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_pending_timers() {
        let trader = trader();
        trader.config.lock().await.copy_delay_ms = 60_000;
        trader.on_whale_trade(whale_trade(5_000.0, "whale1", "other")).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trader.stop().await;
        assert!(trader.open_positions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn price_watch_closes_position_when_stop_loss_crossed() {
        let market_data = Arc::new(MockMarketDataPort::new());
        let mut config = CopyTraderConfig::default();
        config.stop_loss_pct = 10.0;
        let trader = trader_with(config, market_data.clone());
        let mut rx = trader.subscribe();

        trader.on_whale_trade(whale_trade(5_000.0, "whale1", "other")).await;
        let copied_event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let entry_price = match copied_event {
            CopyEvent::TradeCopied(copied) => copied.entry_price,
            other => panic!("expected TradeCopied, got {other:?}"),
        };

        let triple = MarketTriple::new("__whale_venue__", "m1", "yes");
        market_data.set_price(triple, entry_price * 0.85);
        tokio::time::advance(PRICE_WATCH_INTERVAL + std::time::Duration::from_millis(1)).await;

        let closed_event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match closed_event {
            CopyEvent::PositionClosed { trade } => {
                assert_eq!(trade.status, CopiedTradeStatus::Closed);
            }
            other => panic!("expected PositionClosed, got {other:?}"),
        }
        assert!(trader.open_positions().await.is_empty());
    }

    #[test]
    fn threshold_crossed_detects_stop_loss_and_take_profit() {
        assert_eq!(
            threshold_crossed(Side::Buy, 0.50, 0.40, 15.0, 20.0),
            Some("stop_loss")
        );
        assert_eq!(
            threshold_crossed(Side::Buy, 0.50, 0.65, 15.0, 20.0),
            Some("take_profit")
        );
        assert_eq!(threshold_crossed(Side::Buy, 0.50, 0.55, 15.0, 20.0), None);
        assert_eq!(threshold_crossed(Side::Buy, 0.50, 0.40, 0.0, 0.0), None);
    }
}

impl std::fmt::Debug for CopyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyEvent::TradeCopied(t) => f.debug_tuple("TradeCopied").field(&t.market_id).finish(),
            CopyEvent::TradeSkipped { trade, reason } => f
                .debug_struct("TradeSkipped")
                .field("trade", &trade.market_id)
                .field("reason", reason)
                .finish(),
            CopyEvent::PositionClosed { trade } => {
                f.debug_tuple("PositionClosed").field(&trade.market_id).finish()
            }
            CopyEvent::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}
