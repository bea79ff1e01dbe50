//! SQLite-backed persistence for `Trade` records.
//!
//! Mirrors the teacher's `VaultDb`: a single connection behind a
//! `tokio::sync::Mutex`, `CREATE TABLE IF NOT EXISTS` schema setup, WAL mode,
//! and blocking rusqlite calls made inline after the lock is acquired (no
//! `spawn_blocking` — the teacher never reaches for it here either).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::models::{OrderKind, Side, Trade, TradeStatus, Venue};
use crate::ports::TradeStorePort;

/// Conjunctive filter for `getTrades`/`getStats`/CSV export.
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub venue: Option<Venue>,
    pub market_id: Option<String>,
    pub strategy_id: Option<String>,
    pub status: Option<TradeStatus>,
    pub side: Option<Side>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone)]
pub struct TradeStore {
    conn: Arc<Mutex<Connection>>,
}

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn side_from_str(s: &str) -> Side {
    match s {
        "sell" => Side::Sell,
        _ => Side::Buy,
    }
}

fn order_kind_to_str(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "market",
        OrderKind::Limit => "limit",
        OrderKind::Maker => "maker",
    }
}

fn order_kind_from_str(s: &str) -> OrderKind {
    match s {
        "limit" => OrderKind::Limit,
        "maker" => OrderKind::Maker,
        _ => OrderKind::Market,
    }
}

fn status_to_str(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Pending => "pending",
        TradeStatus::Partial => "partial",
        TradeStatus::Filled => "filled",
        TradeStatus::Cancelled => "cancelled",
        TradeStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> TradeStatus {
    match s {
        "partial" => TradeStatus::Partial,
        "filled" => TradeStatus::Filled,
        "cancelled" => TradeStatus::Cancelled,
        "failed" => TradeStatus::Failed,
        _ => TradeStatus::Pending,
    }
}

fn row_to_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let created_at: i64 = row.get("created_at")?;
    let filled_at: Option<i64> = row.get("filled_at")?;

    Ok(Trade {
        trade_id: row.get("trade_id")?,
        venue: Venue(row.get("venue")?),
        market_id: row.get("market_id")?,
        outcome: row.get("outcome")?,
        side: side_from_str(&row.get::<_, String>("side")?),
        order_kind: order_kind_from_str(&row.get::<_, String>("order_kind")?),
        price: row.get("price")?,
        size: row.get("size")?,
        filled: row.get("filled")?,
        cost: row.get("cost")?,
        fees: row.get("fees")?,
        status: status_from_str(&row.get::<_, String>("status")?),
        strategy_id: row.get("strategy_id")?,
        strategy_name: row.get("strategy_name")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        entry_trade_id: row.get("entry_trade_id")?,
        exit_trade_id: row.get("exit_trade_id")?,
        realized_pnl: row.get("realized_pnl")?,
        realized_pnl_pct: row.get("realized_pnl_pct")?,
        created_at: Utc.timestamp_millis_opt(created_at).single().unwrap_or_else(Utc::now),
        filled_at: filled_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
    })
}

impl TradeStore {
    pub fn new(db_path: &str) -> CoreResult<Self> {
        let conn = Connection::open(db_path).map_err(CoreError::from)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                venue TEXT NOT NULL,
                market_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                side TEXT NOT NULL,
                order_kind TEXT NOT NULL,
                price REAL NOT NULL,
                size REAL NOT NULL,
                filled REAL NOT NULL,
                cost REAL NOT NULL,
                fees REAL,
                status TEXT NOT NULL,
                strategy_id TEXT,
                strategy_name TEXT,
                tags TEXT NOT NULL,
                entry_trade_id TEXT,
                exit_trade_id TEXT,
                realized_pnl REAL,
                realized_pnl_pct REAL,
                created_at INTEGER NOT NULL,
                filled_at INTEGER,
                metadata TEXT NOT NULL
            )",
            [],
        )
        .map_err(CoreError::from)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_venue ON trades(venue)",
            [],
        )
        .map_err(CoreError::from)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_strategy ON trades(strategy_id)",
            [],
        )
        .map_err(CoreError::from)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_created_at ON trades(created_at DESC)",
            [],
        )
        .map_err(CoreError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> CoreResult<Self> {
        Self::new(":memory:")
    }
}

#[async_trait]
impl TradeStorePort for TradeStore {
    async fn insert(&self, trade: &Trade) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trades (
                trade_id, venue, market_id, outcome, side, order_kind, price, size, filled,
                cost, fees, status, strategy_id, strategy_name, tags, entry_trade_id,
                exit_trade_id, realized_pnl, realized_pnl_pct, created_at, filled_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                trade.trade_id,
                trade.venue.0,
                trade.market_id,
                trade.outcome,
                side_to_str(trade.side),
                order_kind_to_str(trade.order_kind),
                trade.price,
                trade.size,
                trade.filled,
                trade.cost,
                trade.fees,
                status_to_str(trade.status),
                trade.strategy_id,
                trade.strategy_name,
                serde_json::to_string(&trade.tags).unwrap_or_default(),
                trade.entry_trade_id,
                trade.exit_trade_id,
                trade.realized_pnl,
                trade.realized_pnl_pct,
                trade.created_at.timestamp_millis(),
                trade.filled_at.map(|t| t.timestamp_millis()),
                serde_json::to_string(&trade.metadata).unwrap_or_else(|_| "null".to_string()),
            ],
        )
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn update(&self, trade: &Trade) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE trades SET
                filled = ?2, cost = ?3, fees = ?4, status = ?5, entry_trade_id = ?6,
                exit_trade_id = ?7, realized_pnl = ?8, realized_pnl_pct = ?9, filled_at = ?10,
                metadata = ?11
             WHERE trade_id = ?1",
            params![
                trade.trade_id,
                trade.filled,
                trade.cost,
                trade.fees,
                status_to_str(trade.status),
                trade.entry_trade_id,
                trade.exit_trade_id,
                trade.realized_pnl,
                trade.realized_pnl_pct,
                trade.filled_at.map(|t| t.timestamp_millis()),
                serde_json::to_string(&trade.metadata).unwrap_or_else(|_| "null".to_string()),
            ],
        )
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn get(&self, trade_id: &str) -> CoreResult<Option<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached("SELECT * FROM trades WHERE trade_id = ?1")
            .map_err(CoreError::from)?;
        let mut rows = stmt.query(params![trade_id]).map_err(CoreError::from)?;
        match rows.next().map_err(CoreError::from)? {
            Some(row) => Ok(Some(row_to_trade(row).map_err(CoreError::from)?)),
            None => Ok(None),
        }
    }

    async fn query(&self, filter: &TradeFilter) -> CoreResult<Vec<Trade>> {
        let conn = self.conn.lock().await;
        let mut sql = String::from("SELECT * FROM trades WHERE 1=1");
        if filter.venue.is_some() {
            sql.push_str(" AND venue = :venue");
        }
        if filter.market_id.is_some() {
            sql.push_str(" AND market_id = :market_id");
        }
        if filter.strategy_id.is_some() {
            sql.push_str(" AND strategy_id = :strategy_id");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = :status");
        }
        if filter.side.is_some() {
            sql.push_str(" AND side = :side");
        }
        if filter.since.is_some() {
            sql.push_str(" AND created_at >= :since");
        }
        if filter.until.is_some() {
            sql.push_str(" AND created_at <= :until");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit.min(10_000)));
            if let Some(offset) = filter.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut stmt = conn.prepare(&sql).map_err(CoreError::from)?;
        let venue = filter.venue.as_ref().map(|v| v.0.clone());
        let status = filter.status.map(status_to_str);
        let side = filter.side.map(side_to_str);
        let since = filter.since.map(|t| t.timestamp_millis());
        let until = filter.until.map(|t| t.timestamp_millis());

        let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
        if let Some(v) = &venue {
            named.push((":venue", v));
        }
        if let Some(v) = &filter.market_id {
            named.push((":market_id", v));
        }
        if let Some(v) = &filter.strategy_id {
            named.push((":strategy_id", v));
        }
        if let Some(v) = &status {
            named.push((":status", v));
        }
        if let Some(v) = &side {
            named.push((":side", v));
        }
        if let Some(v) = &since {
            named.push((":since", v));
        }
        if let Some(v) = &until {
            named.push((":until", v));
        }

        let rows = stmt
            .query_map(named.as_slice(), row_to_trade)
            .map_err(CoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(CoreError::from)?);
        }
        Ok(out)
    }

    async fn delete(&self, trade_id: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM trades WHERE trade_id = ?1", params![trade_id])
            .map_err(CoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderKind, Side, TradeStatus};

    fn sample_trade(id: &str) -> Trade {
        Trade {
            trade_id: id.to_string(),
            venue: Venue::from("polymarket"),
            market_id: "will-it-rain".to_string(),
            outcome: "yes".to_string(),
            side: Side::Buy,
            order_kind: OrderKind::Market,
            price: 0.5,
            size: 100.0,
            filled: 0.0,
            cost: 50.0,
            fees: None,
            status: TradeStatus::Pending,
            strategy_id: Some("strat-1".to_string()),
            strategy_name: None,
            tags: vec!["auto".to_string()],
            entry_trade_id: None,
            exit_trade_id: None,
            realized_pnl: None,
            realized_pnl_pct: None,
            created_at: Utc::now(),
            filled_at: None,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = TradeStore::in_memory().unwrap();
        let trade = sample_trade("t1");
        store.insert(&trade).await.unwrap();
        let fetched = store.get("t1").await.unwrap().unwrap();
        assert_eq!(fetched.trade_id, "t1");
        assert_eq!(fetched.tags, vec!["auto".to_string()]);
    }

    #[tokio::test]
    async fn get_unknown_id_returns_none() {
        let store = TradeStore::in_memory().unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_filters_by_strategy_and_status() {
        let store = TradeStore::in_memory().unwrap();
        let mut t1 = sample_trade("t1");
        t1.status = TradeStatus::Filled;
        let mut t2 = sample_trade("t2");
        t2.strategy_id = Some("strat-2".to_string());
        store.insert(&t1).await.unwrap();
        store.insert(&t2).await.unwrap();

        let filter = TradeFilter {
            strategy_id: Some("strat-1".to_string()),
            status: Some(TradeStatus::Filled),
            ..Default::default()
        };
        let results = store.query(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].trade_id, "t1");
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = TradeStore::in_memory().unwrap();
        store.insert(&sample_trade("t1")).await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());
    }
}
