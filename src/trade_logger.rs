//! The authoritative mutator of `Trade` records: assigns ids, applies
//! lifecycle transitions, derives statistics, and emits lifecycle events.
//!
//! Grounded in the teacher's `vault/paper_ledger.rs` mutation shape, wired
//! onto `TradeStore` instead of an in-process ledger so the scheduler and
//! backtest engine can share (or isolate) the ledger per the "shared-vs-
//! isolated TradeLogger" design note.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Trade, TradeSpec, TradeStatus};
use crate::ports::TradeStorePort;
use crate::trade_store::TradeFilter;

#[derive(Debug, Clone)]
pub enum TradeEvent {
    Trade(Trade),
    TradeFilled(Trade),
    TradeCancelled(Trade),
    Error(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub total_volume: f64,
    pub total_fees: f64,
    pub by_venue: HashMap<String, VenueStats>,
    pub by_strategy: HashMap<String, StrategyStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VenueStats {
    pub trades: u64,
    pub pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyStats {
    pub trades: u64,
    pub pnl: f64,
    pub win_rate: f64,
}

pub struct TradeLogger {
    store: Arc<dyn TradeStorePort>,
    events: tokio::sync::broadcast::Sender<TradeEvent>,
}

/// CSV column order is part of the contract — never reorder without a
/// version bump downstream consumers can key off of.
pub const CSV_COLUMNS: &[&str] = &[
    "id",
    "platform",
    "market_id",
    "market_question",
    "outcome",
    "side",
    "order_type",
    "price",
    "size",
    "filled",
    "cost",
    "fees",
    "status",
    "strategy_id",
    "strategy_name",
    "realized_pnl",
    "realized_pnl_pct",
    "created_at",
    "filled_at",
];

impl TradeLogger {
    pub fn new(store: Arc<dyn TradeStorePort>) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(1024);
        Self { store, events: tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TradeEvent> {
        self.events.subscribe()
    }

    pub async fn log_trade(&self, spec: TradeSpec) -> CoreResult<Trade> {
        self.log_trade_with(spec, Uuid::new_v4().to_string(), Utc::now()).await
    }

    /// Same as `log_trade` but with a caller-supplied id and timestamp.
    /// The backtest engine uses this so that replaying the same ticks twice
    /// produces byte-identical trades (spec.md §4.4) instead of a fresh
    /// random id / wall-clock stamp each run.
    pub async fn log_trade_with(
        &self,
        spec: TradeSpec,
        trade_id: String,
        created_at: DateTime<Utc>,
    ) -> CoreResult<Trade> {
        let trade = Trade {
            trade_id,
            venue: spec.venue,
            market_id: spec.market_id,
            outcome: spec.outcome,
            side: spec.side,
            order_kind: spec.order_kind,
            price: spec.price,
            size: spec.size,
            filled: 0.0,
            cost: spec.price * spec.size,
            fees: None,
            status: TradeStatus::Pending,
            strategy_id: spec.strategy_id,
            strategy_name: spec.strategy_name,
            tags: spec.tags,
            entry_trade_id: None,
            exit_trade_id: None,
            realized_pnl: None,
            realized_pnl_pct: None,
            created_at,
            filled_at: None,
            metadata: spec.metadata,
        };

        self.store.insert(&trade).await?;
        let _ = self.events.send(TradeEvent::Trade(trade.clone()));
        Ok(trade)
    }

    pub async fn fill_trade(
        &self,
        trade_id: &str,
        filled_price: f64,
        filled_size: f64,
        fees: Option<f64>,
    ) -> CoreResult<Option<Trade>> {
        self.fill_trade_with(trade_id, filled_price, filled_size, fees, Utc::now())
            .await
    }

    /// Same as `fill_trade` but with a caller-supplied `filled_at`, for the
    /// same determinism reason as `log_trade_with`.
    pub async fn fill_trade_with(
        &self,
        trade_id: &str,
        filled_price: f64,
        filled_size: f64,
        fees: Option<f64>,
        filled_at: DateTime<Utc>,
    ) -> CoreResult<Option<Trade>> {
        let Some(mut trade) = self.store.get(trade_id).await? else {
            return Ok(None);
        };

        trade.filled = filled_size;
        trade.cost = filled_price * filled_size;
        trade.fees = fees;
        trade.status = if filled_size < trade.size {
            TradeStatus::Partial
        } else {
            TradeStatus::Filled
        };
        trade.filled_at = Some(filled_at);

        self.store.update(&trade).await?;
        let _ = self.events.send(TradeEvent::TradeFilled(trade.clone()));
        Ok(Some(trade))
    }

    pub async fn cancel_trade(&self, trade_id: &str) -> CoreResult<Option<Trade>> {
        let Some(mut trade) = self.store.get(trade_id).await? else {
            return Ok(None);
        };
        if trade.status == TradeStatus::Cancelled {
            return Ok(Some(trade));
        }
        trade.status = TradeStatus::Cancelled;
        self.store.update(&trade).await?;
        let _ = self.events.send(TradeEvent::TradeCancelled(trade.clone()));
        Ok(Some(trade))
    }

    /// Writes cross-references on both rows; `realizedPnLPct` is computed
    /// against the entry's cost.
    pub async fn link_trades(
        &self,
        entry_id: &str,
        exit_id: &str,
        realized_pnl: f64,
    ) -> CoreResult<()> {
        let Some(mut entry) = self.store.get(entry_id).await? else {
            return Err(CoreError::NotFound(format!("entry trade {entry_id}")));
        };
        let Some(mut exit) = self.store.get(exit_id).await? else {
            return Err(CoreError::NotFound(format!("exit trade {exit_id}")));
        };

        entry.exit_trade_id = Some(exit_id.to_string());
        entry.realized_pnl = Some(realized_pnl);
        entry.realized_pnl_pct = if entry.cost != 0.0 {
            Some(realized_pnl / entry.cost)
        } else {
            Some(0.0)
        };
        exit.entry_trade_id = Some(entry_id.to_string());

        self.store.update(&entry).await?;
        self.store.update(&exit).await?;
        Ok(())
    }

    pub async fn get_trades(&self, filter: &TradeFilter) -> CoreResult<Vec<Trade>> {
        self.store.query(filter).await
    }

    pub async fn get_trade(&self, trade_id: &str) -> CoreResult<Option<Trade>> {
        self.store.get(trade_id).await
    }

    pub async fn get_stats(&self, filter: &TradeFilter) -> CoreResult<TradeStats> {
        let trades = self.store.query(filter).await?;
        Ok(compute_stats(&trades))
    }

    /// Groups closed trades (those carrying a `realizedPnL`) by calendar day
    /// (UTC) and sums their P&L.
    pub async fn get_daily_pnl(&self, days: i64) -> CoreResult<Vec<(DateTime<Utc>, f64)>> {
        let since = Utc::now() - chrono::Duration::days(days);
        let filter = TradeFilter {
            since: Some(since),
            ..Default::default()
        };
        let trades = self.store.query(&filter).await?;

        let mut by_day: HashMap<(i32, u32, u32), f64> = HashMap::new();
        for trade in trades.iter().filter(|t| t.realized_pnl.is_some()) {
            let d = trade.created_at.date_naive();
            *by_day.entry((d.year(), d.month(), d.day())).or_insert(0.0) +=
                trade.realized_pnl.unwrap_or(0.0);
        }

        let mut out: Vec<(DateTime<Utc>, f64)> = by_day
            .into_iter()
            .filter_map(|((y, m, d), pnl)| {
                chrono::NaiveDate::from_ymd_opt(y, m, d)
                    .and_then(|nd| nd.and_hms_opt(0, 0, 0))
                    .map(|ndt| (DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc), pnl))
            })
            .collect();
        out.sort_by_key(|(ts, _)| *ts);
        Ok(out)
    }

    pub async fn export_csv(&self, filter: &TradeFilter) -> CoreResult<String> {
        let trades = self.store.query(filter).await?;
        let mut out = String::new();
        out.push_str(&CSV_COLUMNS.join(","));
        out.push('\n');

        for t in &trades {
            let row = vec![
                t.trade_id.clone(),
                t.venue.0.clone(),
                t.market_id.clone(),
                String::new(),
                t.outcome.clone(),
                format!("{:?}", t.side).to_lowercase(),
                format!("{:?}", t.order_kind).to_lowercase(),
                t.price.to_string(),
                t.size.to_string(),
                t.filled.to_string(),
                t.cost.to_string(),
                t.fees.map(|f| f.to_string()).unwrap_or_default(),
                format!("{:?}", t.status).to_lowercase(),
                t.strategy_id.clone().unwrap_or_default(),
                t.strategy_name.clone().unwrap_or_default(),
                t.realized_pnl.map(|p| p.to_string()).unwrap_or_default(),
                t.realized_pnl_pct.map(|p| p.to_string()).unwrap_or_default(),
                t.created_at.to_rfc3339(),
                t.filled_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
            ];
            out.push_str(&row.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(","));
            out.push('\n');
        }

        Ok(out)
    }

    /// Deletes trades older than `older_than_days` whose linked counterpart
    /// (if any) is also older than the cutoff, never breaking a live pair.
    pub async fn cleanup(&self, older_than_days: i64) -> CoreResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let all = self
            .store
            .query(&TradeFilter {
                until: Some(cutoff),
                ..Default::default()
            })
            .await?;

        let by_id: HashMap<&str, &Trade> = all.iter().map(|t| (t.trade_id.as_str(), t)).collect();
        let mut deleted = 0u64;
        for trade in &all {
            let counterpart_id = trade.entry_trade_id.as_deref().or(trade.exit_trade_id.as_deref());
            let counterpart_old = match counterpart_id {
                Some(id) => by_id.get(id).map(|t| t.created_at <= cutoff).unwrap_or(false),
                None => true,
            };
            if counterpart_old {
                self.store.delete(&trade.trade_id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn compute_stats(trades: &[Trade]) -> TradeStats {
    let closed: Vec<&Trade> = trades.iter().filter(|t| t.realized_pnl.is_some()).collect();
    let total_trades = trades.len() as u64;
    let wins = closed.iter().filter(|t| t.realized_pnl.unwrap_or(0.0) > 0.0).count() as u64;
    let losses = closed.iter().filter(|t| t.realized_pnl.unwrap_or(0.0) < 0.0).count() as u64;
    let win_rate = if !closed.is_empty() {
        wins as f64 / closed.len() as f64 * 100.0
    } else {
        0.0
    };

    let total_pnl: f64 = closed.iter().map(|t| t.realized_pnl.unwrap_or(0.0)).sum();
    let total_wins: f64 = closed
        .iter()
        .filter_map(|t| t.realized_pnl)
        .filter(|p| *p > 0.0)
        .sum();
    let total_losses: f64 = closed
        .iter()
        .filter_map(|t| t.realized_pnl)
        .filter(|p| *p < 0.0)
        .sum();

    let avg_pnl = if !closed.is_empty() {
        total_pnl / closed.len() as f64
    } else {
        0.0
    };
    let avg_win = if wins > 0 { total_wins / wins as f64 } else { 0.0 };
    let avg_loss = if losses > 0 { total_losses / losses as f64 } else { 0.0 };
    let largest_win = closed
        .iter()
        .filter_map(|t| t.realized_pnl)
        .fold(0.0_f64, f64::max);
    let largest_loss = closed
        .iter()
        .filter_map(|t| t.realized_pnl)
        .fold(0.0_f64, f64::min);

    let profit_factor = if total_losses == 0.0 {
        if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        total_wins / total_losses.abs()
    };

    let total_volume: f64 = trades.iter().map(|t| t.cost).sum();
    let total_fees: f64 = trades.iter().filter_map(|t| t.fees).sum();

    let mut by_venue: HashMap<String, VenueStats> = HashMap::new();
    let mut by_strategy: HashMap<String, StrategyStats> = HashMap::new();

    for t in trades {
        let venue_entry = by_venue.entry(t.venue.0.clone()).or_default();
        venue_entry.trades += 1;
        if let Some(pnl) = t.realized_pnl {
            venue_entry.pnl += pnl;
        }

        if let Some(strategy_id) = &t.strategy_id {
            let strat_entry = by_strategy.entry(strategy_id.clone()).or_default();
            strat_entry.trades += 1;
            if let Some(pnl) = t.realized_pnl {
                strat_entry.pnl += pnl;
            }
        }
    }

    for (venue, stats) in by_venue.iter_mut() {
        let venue_wins = closed
            .iter()
            .filter(|t| t.venue.0 == *venue && t.realized_pnl.unwrap_or(0.0) > 0.0)
            .count();
        let venue_closed = closed.iter().filter(|t| t.venue.0 == *venue).count();
        stats.win_rate = if venue_closed > 0 {
            venue_wins as f64 / venue_closed as f64 * 100.0
        } else {
            0.0
        };
    }

    for (strategy_id, stats) in by_strategy.iter_mut() {
        let strat_wins = closed
            .iter()
            .filter(|t| t.strategy_id.as_deref() == Some(strategy_id.as_str()) && t.realized_pnl.unwrap_or(0.0) > 0.0)
            .count();
        let strat_closed = closed
            .iter()
            .filter(|t| t.strategy_id.as_deref() == Some(strategy_id.as_str()))
            .count();
        stats.win_rate = if strat_closed > 0 {
            strat_wins as f64 / strat_closed as f64 * 100.0
        } else {
            0.0
        };
    }

    TradeStats {
        total_trades,
        wins,
        losses,
        win_rate,
        total_pnl,
        avg_pnl,
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        profit_factor,
        total_volume,
        total_fees,
        by_venue,
        by_strategy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderKind, Side, Venue};
    use crate::trade_store::TradeStore;

    fn logger() -> TradeLogger {
        let store = TradeStore::in_memory().unwrap();
        TradeLogger::new(Arc::new(store))
    }

    fn spec() -> TradeSpec {
        TradeSpec {
            venue: Venue::from("polymarket"),
            market_id: "m1".to_string(),
            outcome: "yes".to_string(),
            side: Side::Buy,
            order_kind: OrderKind::Market,
            price: 0.5,
            size: 100.0,
            strategy_id: Some("s1".to_string()),
            strategy_name: None,
            tags: vec![],
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn log_trade_then_get_trade_round_trips() {
        let logger = logger();
        let trade = logger.log_trade(spec()).await.unwrap();
        let fetched = logger.get_trade(&trade.trade_id).await.unwrap().unwrap();
        assert_eq!(fetched.trade_id, trade.trade_id);
        assert_eq!(fetched.status, TradeStatus::Pending);
        assert_eq!(fetched.cost, 50.0);
    }

    #[tokio::test]
    async fn fill_trade_transitions_to_partial_then_filled() {
        let logger = logger();
        let trade = logger.log_trade(spec()).await.unwrap();
        let partial = logger
            .fill_trade(&trade.trade_id, 0.5, 40.0, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partial.status, TradeStatus::Partial);

        let filled = logger
            .fill_trade(&trade.trade_id, 0.5, 100.0, Some(0.1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(filled.status, TradeStatus::Filled);
        assert_eq!(filled.filled, 100.0);
    }

    #[tokio::test]
    async fn cancel_on_already_cancelled_is_a_no_op() {
        let logger = logger();
        let trade = logger.log_trade(spec()).await.unwrap();
        logger.cancel_trade(&trade.trade_id).await.unwrap();
        let second = logger.cancel_trade(&trade.trade_id).await.unwrap().unwrap();
        assert_eq!(second.status, TradeStatus::Cancelled);
    }

    #[tokio::test]
    async fn link_trades_computes_realized_pnl_pct() {
        let logger = logger();
        let entry = logger.log_trade(spec()).await.unwrap();
        let mut exit_spec = spec();
        exit_spec.side = Side::Sell;
        let exit = logger.log_trade(exit_spec).await.unwrap();

        logger
            .link_trades(&entry.trade_id, &exit.trade_id, 10.0)
            .await
            .unwrap();

        let updated_entry = logger.get_trade(&entry.trade_id).await.unwrap().unwrap();
        assert_eq!(updated_entry.realized_pnl, Some(10.0));
        assert_eq!(updated_entry.realized_pnl_pct, Some(0.2));
        assert_eq!(updated_entry.exit_trade_id.as_deref(), Some(exit.trade_id.as_str()));
    }

    #[tokio::test]
    async fn stats_with_zero_closed_trades_reports_zero() {
        let logger = logger();
        logger.log_trade(spec()).await.unwrap();
        let stats = logger.get_stats(&TradeFilter::default()).await.unwrap();
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.profit_factor, 0.0);
    }

    #[tokio::test]
    async fn stats_with_only_wins_has_infinite_profit_factor() {
        let logger = logger();
        let entry = logger.log_trade(spec()).await.unwrap();
        let mut exit_spec = spec();
        exit_spec.side = Side::Sell;
        let exit = logger.log_trade(exit_spec).await.unwrap();
        logger
            .link_trades(&entry.trade_id, &exit.trade_id, 25.0)
            .await
            .unwrap();

        let stats = logger.get_stats(&TradeFilter::default()).await.unwrap();
        assert!(stats.profit_factor.is_infinite());
    }

    #[tokio::test]
    async fn csv_export_round_trips_through_parse() {
        let logger = logger();
        logger.log_trade(spec()).await.unwrap();
        let csv = logger.export_csv(&TradeFilter::default()).await.unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert_eq!(header, CSV_COLUMNS.join(","));
        assert_eq!(lines.count(), 1);
    }
}
