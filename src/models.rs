//! Core data model shared by the scheduler, trade logger, backtest engine,
//! whale tracker and swarm executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An external prediction market or trading platform. Kept as an opaque
/// string newtype rather than a closed enum — venue adapters are ports
/// (see `ports.rs`), and a new venue never requires a crate change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Venue(pub String);

impl From<&str> for Venue {
    fn from(s: &str) -> Self {
        Venue(s.to_string())
    }
}

impl From<String> for Venue {
    fn from(s: String) -> Self {
        Venue(s)
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The canonical identity of a position: `(venue, marketId, outcome)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketTriple {
    pub venue: Venue,
    pub market_id: String,
    pub outcome: String,
}

impl MarketTriple {
    pub fn new(
        venue: impl Into<Venue>,
        market_id: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            venue: venue.into(),
            market_id: market_id.into(),
            outcome: outcome.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    Maker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Failed,
}

/// Immutable identity, mutated only by the `TradeLogger`.
///
/// Invariants: `filled <= size`; `status == Filled => filled == size`;
/// `status in {Partial, Filled} => filled_at.is_some()`; an exit trade's
/// `realized_pnl` equals its net proceeds minus the linked entry's cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub venue: Venue,
    pub market_id: String,
    pub outcome: String,
    pub side: Side,
    pub order_kind: OrderKind,
    pub price: f64,
    pub size: f64,
    pub filled: f64,
    pub cost: f64,
    pub fees: Option<f64>,
    pub status: TradeStatus,
    pub strategy_id: Option<String>,
    pub strategy_name: Option<String>,
    pub tags: Vec<String>,
    pub entry_trade_id: Option<String>,
    pub exit_trade_id: Option<String>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl Trade {
    pub fn market_triple(&self) -> MarketTriple {
        MarketTriple::new(self.venue.clone(), self.market_id.clone(), self.outcome.clone())
    }
}

/// A spec for placing a new trade — the inputs to `TradeLogger::log_trade`.
#[derive(Debug, Clone)]
pub struct TradeSpec {
    pub venue: Venue,
    pub market_id: String,
    pub outcome: String,
    pub side: Side,
    pub order_kind: OrderKind,
    pub price: f64,
    pub size: f64,
    pub strategy_id: Option<String>,
    pub strategy_name: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Derived, never persisted: recomputed from the open-trade set.
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub shares: f64,
    pub avg_price: f64,
    pub current_price: f64,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.shares * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.shares * (self.current_price - self.avg_price)
    }
}

/// Per-signal and portfolio risk caps attached to a strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_size: Option<f64>,
    pub max_exposure: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub venues: Vec<Venue>,
    pub market_filter: Option<String>,
    pub interval_ms: u64,
    pub limits: RiskLimits,
    pub enabled: bool,
    pub dry_run: bool,
    /// Free-form bag used only by the strategy that owns it — kept opaque
    /// rather than type-safe across strategies (see design notes).
    pub params: serde_json::Value,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), crate::error::CoreError> {
        if self.id.trim().is_empty() {
            return Err(crate::error::CoreError::Invalid(
                "strategy id must not be empty".into(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(crate::error::CoreError::Invalid(
                "intervalMs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The markets this strategy actively subscribes to: the cross product
    /// of `venues` and the `marketId:outcome` pairs named in `market_filter`
    /// (comma-separated, e.g. `"market-1:yes,market-2:no"`). Empty when
    /// `market_filter` is unset — open positions are tracked regardless of
    /// this list (see `Scheduler::build_context`).
    pub fn subscribed_markets(&self) -> Vec<MarketTriple> {
        let Some(filter) = self.market_filter.as_deref() else {
            return Vec::new();
        };
        let mut markets = Vec::new();
        for entry in filter.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let Some((market_id, outcome)) = entry.split_once(':') else {
                continue;
            };
            for venue in &self.venues {
                markets.push(MarketTriple::new(venue.clone(), market_id, outcome));
            }
        }
        markets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Stopped,
    Running,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub id: String,
    pub state: BotState,
    pub trades_count: u64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_signal: Option<Signal>,
    pub last_error: Option<String>,
}

impl BotStatus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: BotState::Stopped,
            trades_count: 0,
            total_pnl: 0.0,
            win_rate: 0.0,
            started_at: None,
            last_check: None,
            last_signal: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
    Close,
}

/// Transient: produced by strategies, consumed by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub venue: Venue,
    pub market_id: String,
    pub outcome: String,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub size_pct: Option<f64>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub meta: serde_json::Value,
}

impl Signal {
    pub fn market_triple(&self) -> MarketTriple {
        MarketTriple::new(self.venue.clone(), self.market_id.clone(), self.outcome.clone())
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self.signal_type, SignalType::Hold)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketMetadata {
    pub question: Option<String>,
    pub liquidity: Option<f64>,
    pub volume_24h: Option<f64>,
}

/// Bounded ring of recent price ticks for one market triple.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    capacity: usize,
    points: std::collections::VecDeque<(DateTime<Utc>, f64)>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, price: f64) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((at, price));
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.back().map(|(_, p)| *p)
    }

    pub fn as_slice(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.points.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Read-only per-evaluation snapshot handed to `Strategy::evaluate`.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub strategy_id: String,
    pub config: StrategyConfig,
    pub portfolio_value: f64,
    pub balance: f64,
    pub positions: HashMap<MarketTriple, Position>,
    pub recent_trades: Vec<Trade>,
    pub market_metadata: HashMap<MarketTriple, MarketMetadata>,
    pub price_history: HashMap<MarketTriple, Vec<(DateTime<Utc>, f64)>>,
    pub timestamp: DateTime<Utc>,
    pub is_backtest: bool,
    /// Attached only by the `BacktestEngine` when `includeOrderbook` is set;
    /// always `None` for live scheduler ticks.
    pub orderbook: Option<OrderbookSnapshot>,
}

/// A single orderbook snapshot for one market triple, used by the backtest
/// engine to attach book context to a replayed tick.
#[derive(Debug, Clone)]
pub struct OrderbookSnapshot {
    pub time: DateTime<Utc>,
    pub triple: MarketTriple,
    pub best_bid: f64,
    pub best_ask: f64,
}

// --- Whale tracking ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTrade {
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub outcome: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub usd_value: f64,
    pub maker: String,
    pub taker: String,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhalePosition {
    pub address: String,
    pub market_id: String,
    pub outcome: String,
    pub size: f64,
    pub avg_entry_price: f64,
    pub usd_value: f64,
    pub unrealized_pnl: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhaleProfile {
    pub address: String,
    pub total_value: f64,
    pub win_rate: f64,
    pub avg_return: f64,
    pub positions: Vec<WhalePosition>,
    pub recent_trades: Vec<WhaleTrade>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    /// (closed, won, return_sum) backing `win_rate`/`avg_return` — derived
    /// from observed entry/exit pairs rather than left at a placeholder
    /// zero (see design notes §9).
    pub closed_positions_observed: u32,
    pub winning_positions_observed: u32,
    pub return_sum_observed: f64,
}

impl WhaleProfile {
    pub fn record_closed_position(&mut self, won: bool, return_pct: f64) {
        self.closed_positions_observed += 1;
        if won {
            self.winning_positions_observed += 1;
        }
        self.return_sum_observed += return_pct;
        self.win_rate = self.winning_positions_observed as f64 / self.closed_positions_observed as f64;
        self.avg_return = self.return_sum_observed / self.closed_positions_observed as f64;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopiedTradeStatus {
    Pending,
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopiedTrade {
    pub original_trade_ref: String,
    pub copied_at: DateTime<Utc>,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub status: CopiedTradeStatus,
    pub pnl: Option<f64>,
    pub order_handle: Option<String>,
    pub market_id: String,
    pub outcome: String,
}

// --- Swarm --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmWallet {
    pub id: String,
    pub signer_identity: String,
    pub public_identifier: String,
    pub sol_balance: f64,
    pub token_balances: HashMap<String, f64>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SwarmPosition {
    pub mint: String,
    pub total: f64,
    pub per_wallet: HashMap<String, f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

