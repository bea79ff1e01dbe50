//! Tick-by-tick replay engine (spec.md §4.4).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::models::{
    MarketTriple, OrderbookSnapshot, Position, Side, SignalType, StrategyConfig, StrategyContext,
    TradeSpec, Venue,
};
use crate::scheduler::strategy::Strategy;
use crate::trade_logger::TradeLogger;
use crate::trade_store::TradeStore;

use super::metrics::BacktestMetrics;

/// A single price observation `{time, venue, marketId, outcome, price}`.
#[derive(Debug, Clone)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub venue: Venue,
    pub market_id: String,
    pub outcome: String,
    pub price: f64,
}

impl Tick {
    pub fn triple(&self) -> MarketTriple {
        MarketTriple::new(self.venue.clone(), self.market_id.clone(), self.outcome.clone())
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub risk_free_rate: f64,
    /// 0 = evaluate on every tick.
    pub eval_interval_ms: i64,
    pub price_history_size: usize,
    pub include_orderbook: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            risk_free_rate: 0.0,
            eval_interval_ms: 0,
            price_history_size: 200,
            include_orderbook: false,
            start: None,
            end: None,
        }
    }
}

struct SimPosition {
    shares: f64,
    avg_price: f64,
    current_price: f64,
    entry_trade_id: Option<String>,
}

/// Replays a historical tick sequence (and optional orderbook snapshots)
/// against a `Strategy`, reusing the live `Strategy` trait and a dedicated
/// (or shared — see `BacktestEngine::with_shared_logger`) `TradeLogger` so
/// backtest trades have the exact same shape as live ones.
pub struct BacktestEngine {
    config: BacktestConfig,
    strategy_config: StrategyConfig,
    logger: Arc<TradeLogger>,
    cash: f64,
    positions: HashMap<MarketTriple, SimPosition>,
    price_history: HashMap<MarketTriple, VecDeque<(DateTime<Utc>, f64)>>,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
    last_eval_time: Option<DateTime<Utc>>,
    total_commission: f64,
    total_slippage: f64,
    /// Monotonic counter driving deterministic trade ids (see `simulate_fill`).
    trade_seq: u64,
}

impl BacktestEngine {
    /// Creates a dedicated, isolated in-memory `TradeStore`/`TradeLogger`.
    pub fn new(config: BacktestConfig, strategy_config: StrategyConfig) -> CoreResult<Self> {
        let store = TradeStore::in_memory()?;
        let logger = Arc::new(TradeLogger::new(Arc::new(store)));
        Ok(Self::with_shared_logger(config, strategy_config, logger))
    }

    /// Shares a logger (and its backing store) with a live scheduler — the
    /// only controlled coupling between backtest and live (design notes).
    pub fn with_shared_logger(
        config: BacktestConfig,
        strategy_config: StrategyConfig,
        logger: Arc<TradeLogger>,
    ) -> Self {
        let cash = config.initial_capital;
        Self {
            config,
            strategy_config,
            logger,
            cash,
            positions: HashMap::new(),
            price_history: HashMap::new(),
            equity_curve: Vec::new(),
            last_eval_time: None,
            total_commission: 0.0,
            total_slippage: 0.0,
            trade_seq: 0,
        }
    }

    pub fn logger(&self) -> Arc<TradeLogger> {
        self.logger.clone()
    }

    /// Runs the replay. Ticks must already be in non-decreasing timestamp
    /// order — the engine asserts strict ordering as it goes.
    pub async fn run(
        &mut self,
        strategy: &mut dyn Strategy,
        ticks: &[Tick],
        orderbooks: &[OrderbookSnapshot],
    ) -> CoreResult<BacktestMetrics> {
        if ticks.is_empty() {
            return Ok(BacktestMetrics::empty(self.config.initial_capital));
        }

        let mut last_time: Option<DateTime<Utc>> = None;
        for tick in ticks {
            if let Some(prev) = last_time {
                if tick.time < prev {
                    return Err(CoreError::Invalid(
                        "ticks must be supplied in non-decreasing timestamp order".into(),
                    ));
                }
            }
            last_time = Some(tick.time);

            if let Some(start) = self.config.start {
                if tick.time < start {
                    continue;
                }
            }
            if let Some(end) = self.config.end {
                if tick.time > end {
                    break;
                }
            }

            self.apply_tick(strategy, tick, orderbooks).await?;
        }

        Ok(BacktestMetrics::compute(
            &self.equity_curve,
            self.config.initial_capital,
            self.config.risk_free_rate,
            self.trades_snapshot().await?,
            self.total_commission,
            self.total_slippage,
        ))
    }

    async fn trades_snapshot(&self) -> CoreResult<Vec<crate::models::Trade>> {
        self.logger
            .get_trades(&crate::trade_store::TradeFilter {
                strategy_id: Some(self.strategy_config.id.clone()),
                ..Default::default()
            })
            .await
    }

    async fn apply_tick(
        &mut self,
        strategy: &mut dyn Strategy,
        tick: &Tick,
        orderbooks: &[OrderbookSnapshot],
    ) -> CoreResult<()> {
        let triple = tick.triple();

        // 1. Append to the rolling, capped price history.
        let hist = self
            .price_history
            .entry(triple.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.config.price_history_size));
        if hist.len() >= self.config.price_history_size {
            hist.pop_front();
        }
        hist.push_back((tick.time, tick.price));

        // 2. Update synthetic positions' current price.
        if let Some(pos) = self.positions.get_mut(&triple) {
            pos.current_price = tick.price;
        }

        // 3. Cadence gate.
        let should_eval = match self.config.eval_interval_ms {
            0 => true,
            interval_ms => match self.last_eval_time {
                None => true,
                Some(last) => (tick.time - last).num_milliseconds() >= interval_ms,
            },
        };
        if !should_eval {
            self.append_equity_point(tick.time);
            return Ok(());
        }
        self.last_eval_time = Some(tick.time);

        // 4. Optionally attach the most recent orderbook snapshot within
        // [tick.time - 60s, tick.time] via binary search.
        let orderbook = if self.config.include_orderbook {
            find_orderbook(orderbooks, &triple, tick.time)
        } else {
            None
        };

        let ctx = self.build_context(tick.time, orderbook);
        let signals = strategy.evaluate(&ctx).await?;

        for signal in signals.iter().filter(|s| s.is_actionable()) {
            self.simulate_fill(signal, tick).await?;
        }

        self.append_equity_point(tick.time);
        Ok(())
    }

    fn build_context(&self, now: DateTime<Utc>, orderbook: Option<OrderbookSnapshot>) -> StrategyContext {
        let positions: HashMap<MarketTriple, Position> = self
            .positions
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    Position {
                        shares: v.shares,
                        avg_price: v.avg_price,
                        current_price: v.current_price,
                    },
                )
            })
            .collect();

        let portfolio_value = self.cash
            + positions.values().map(|p| p.market_value()).sum::<f64>();

        let price_history = self
            .price_history
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect::<Vec<_>>()))
            .collect();

        StrategyContext {
            strategy_id: self.strategy_config.id.clone(),
            config: self.strategy_config.clone(),
            portfolio_value,
            balance: self.cash,
            positions,
            recent_trades: Vec::new(),
            market_metadata: HashMap::new(),
            price_history,
            timestamp: now,
            is_backtest: true,
            orderbook,
        }
    }

    /// Simulates a fill at `tick.price * (1 + slippagePct * sgn)`, debits or
    /// credits cash (including commission), updates the synthetic position,
    /// and writes a `Trade` through the shared logger shape.
    async fn simulate_fill(&mut self, signal: &crate::models::Signal, tick: &Tick) -> CoreResult<()> {
        let triple = tick.triple();
        let sgn = match signal.signal_type {
            SignalType::Buy => 1.0,
            SignalType::Sell | SignalType::Close => -1.0,
            SignalType::Hold => return Ok(()),
        };
        let fill_price = tick.price * (1.0 + self.config.slippage_pct * sgn);
        let size = match signal.signal_type {
            SignalType::Close => self
                .positions
                .get(&triple)
                .map(|p| p.shares)
                .unwrap_or(0.0),
            _ => signal.size.unwrap_or(0.0),
        };
        if size <= 0.0 {
            return Ok(());
        }

        let notional = fill_price * size;
        let commission = notional * self.config.commission_pct;
        let slippage_cost = (fill_price - tick.price).abs() * size;

        let side = match signal.signal_type {
            SignalType::Sell | SignalType::Close => Side::Sell,
            _ => Side::Buy,
        };

        if side == Side::Buy && notional + commission > self.cash {
            return Err(CoreError::InsufficientFunds {
                required: notional + commission,
                available: self.cash,
            });
        }

        let spec = TradeSpec {
            venue: tick.venue.clone(),
            market_id: tick.market_id.clone(),
            outcome: tick.outcome.clone(),
            side,
            order_kind: crate::models::OrderKind::Market,
            price: fill_price,
            size,
            strategy_id: Some(self.strategy_config.id.clone()),
            strategy_name: Some(self.strategy_config.name.clone()),
            tags: vec!["backtest".to_string()],
            metadata: serde_json::json!({}),
        };
        // Deterministic id + the tick's own timestamp rather than
        // Uuid::new_v4()/Utc::now(), so replaying the same ticks twice
        // produces a byte-identical trade sequence (spec.md §4.4).
        let trade_id = format!("bt-{}-{:010}", self.strategy_config.id, self.trade_seq);
        self.trade_seq += 1;
        let trade = self.logger.log_trade_with(spec, trade_id, tick.time).await?;
        self.logger
            .fill_trade_with(&trade.trade_id, fill_price, size, Some(commission), tick.time)
            .await?;

        self.total_commission += commission;
        self.total_slippage += slippage_cost;

        match side {
            Side::Buy => {
                self.cash -= notional + commission;
                let entry = self.positions.entry(triple).or_insert_with(|| SimPosition {
                    shares: 0.0,
                    avg_price: fill_price,
                    current_price: fill_price,
                    entry_trade_id: Some(trade.trade_id.clone()),
                });
                let total_shares = entry.shares + size;
                entry.avg_price = if total_shares > 0.0 {
                    (entry.avg_price * entry.shares + fill_price * size) / total_shares
                } else {
                    fill_price
                };
                entry.shares = total_shares;
                entry.current_price = fill_price;
            }
            Side::Sell => {
                self.cash += notional - commission;
                if let Some(pos) = self.positions.get_mut(&triple) {
                    let closed_shares = size.min(pos.shares);
                    let realized_pnl = closed_shares * (fill_price - pos.avg_price) - commission;
                    if let Some(entry_id) = pos.entry_trade_id.clone() {
                        self.logger
                            .link_trades(&entry_id, &trade.trade_id, realized_pnl)
                            .await?;
                    }
                    pos.shares -= closed_shares;
                    pos.current_price = fill_price;
                    if pos.shares <= 0.0 {
                        self.positions.remove(&triple);
                    }
                }
            }
        }

        Ok(())
    }

    fn append_equity_point(&mut self, at: DateTime<Utc>) {
        let positions_value: f64 = self
            .positions
            .values()
            .map(|p| p.shares * p.current_price)
            .sum();
        self.equity_curve.push((at, self.cash + positions_value));
    }
}

/// Binary search for the most recent snapshot with
/// `tick_time - 60s <= snapshot.time <= tick_time` for the given triple.
/// `snapshots` must be sorted ascending by `time`.
fn find_orderbook(
    snapshots: &[OrderbookSnapshot],
    triple: &MarketTriple,
    tick_time: DateTime<Utc>,
) -> Option<OrderbookSnapshot> {
    let window_start = tick_time - chrono::Duration::seconds(60);
    let relevant: Vec<&OrderbookSnapshot> = snapshots.iter().filter(|s| &s.triple == triple).collect();
    if relevant.is_empty() {
        return None;
    }

    let mut lo = 0usize;
    let mut hi = relevant.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if relevant[mid].time <= tick_time {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == 0 {
        return None;
    }
    let candidate = relevant[lo - 1];
    if candidate.time >= window_start && candidate.time <= tick_time {
        Some(candidate.clone())
    } else {
        None
    }
}
