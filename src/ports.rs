//! External collaborator contracts. Venue protocol handling, chain RPCs and
//! persistence wiring all live behind these traits — the core never depends
//! on a concrete venue.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::CoreResult;
use crate::models::{MarketMetadata, MarketTriple, Trade};

/// Abstract access to market metadata and prices for one venue.
///
/// Deliberate deviation from spec.md §6: that section names
/// `subscribeTrades`/`subscribeOrderbook` on this port, but this codebase
/// models the one stream consumer it actually has (`WhaleTracker`) through
/// the separate `WhaleFeedPort` instead, and everything else (Scheduler,
/// CopyTrader's price-watch) only ever needs point-in-time reads. Adding
/// subscription methods here would give `MarketDataPort` two unrelated
/// responsibilities for no caller; see DESIGN.md.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    async fn get_market(&self, triple: &MarketTriple) -> CoreResult<MarketMetadata>;
    async fn get_price(&self, triple: &MarketTriple) -> CoreResult<Option<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub triple: MarketTriple,
    pub side: crate::models::Side,
    pub price: Option<f64>,
    pub size: f64,
    pub order_kind: crate::models::OrderKind,
    pub slippage_bound: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub avg_fill_price: f64,
    pub error: Option<String>,
}

/// Abstract order placement, cancellation and status lookup.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn place_order(&self, spec: OrderSpec) -> CoreResult<OrderResult>;
    async fn cancel_order(&self, order_id: &str) -> CoreResult<bool>;
    async fn get_order_status(&self, order_id: &str) -> CoreResult<Option<OrderStatus>>;
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    pub value: f64,
    pub balance: f64,
    pub positions: Vec<(MarketTriple, crate::models::Position)>,
}

/// Invoked once per strategy tick to build the `StrategyContext`.
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    async fn snapshot(&self) -> CoreResult<PortfolioSnapshot>;
}

/// Venue-native position lookup. Used by the SwarmExecutor to verify
/// sellable balances directly against chain state; callers never trust a
/// local cache for a sell decision.
#[async_trait]
pub trait PositionQuery: Send + Sync {
    async fn position_of(&self, signer_identity: &str, mint: &str) -> CoreResult<f64>;
}

/// Keyed CRUD over `Trade` records, matching §3's invariants. `TradeLogger`
/// is the only writer; other components read through it.
#[async_trait]
pub trait TradeStorePort: Send + Sync {
    async fn insert(&self, trade: &Trade) -> CoreResult<()>;
    async fn update(&self, trade: &Trade) -> CoreResult<()>;
    async fn get(&self, trade_id: &str) -> CoreResult<Option<Trade>>;
    async fn query(&self, filter: &crate::trade_store::TradeFilter) -> CoreResult<Vec<Trade>>;
    async fn delete(&self, trade_id: &str) -> CoreResult<()>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    pub struct MockMarketDataPort {
        pub prices: Mutex<HashMap<MarketTriple, f64>>,
        pub metadata: Mutex<HashMap<MarketTriple, MarketMetadata>>,
    }

    impl MockMarketDataPort {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_price(&self, triple: MarketTriple, price: f64) {
            self.prices.lock().insert(triple, price);
        }
    }

    #[async_trait]
    impl MarketDataPort for MockMarketDataPort {
        async fn get_market(&self, triple: &MarketTriple) -> CoreResult<MarketMetadata> {
            Ok(self
                .metadata
                .lock()
                .get(triple)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_price(&self, triple: &MarketTriple) -> CoreResult<Option<f64>> {
            Ok(self.prices.lock().get(triple).copied())
        }
    }

    pub struct MockExecutionPort {
        pub next_result: Mutex<Option<OrderResult>>,
        pub placed: Mutex<Vec<OrderSpec>>,
    }

    impl Default for MockExecutionPort {
        fn default() -> Self {
            Self {
                next_result: Mutex::new(None),
                placed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionPort for MockExecutionPort {
        async fn place_order(&self, spec: OrderSpec) -> CoreResult<OrderResult> {
            let result = self.next_result.lock().clone().unwrap_or(OrderResult {
                success: true,
                order_id: Some("mock-order".to_string()),
                status: OrderStatus::Filled,
                filled_size: spec.size,
                avg_fill_price: spec.price.unwrap_or(0.5),
                error: None,
            });
            self.placed.lock().push(spec);
            Ok(result)
        }

        async fn cancel_order(&self, _order_id: &str) -> CoreResult<bool> {
            Ok(true)
        }

        async fn get_order_status(&self, _order_id: &str) -> CoreResult<Option<OrderStatus>> {
            Ok(Some(OrderStatus::Filled))
        }
    }

    pub fn arc_market_data() -> Arc<MockMarketDataPort> {
        Arc::new(MockMarketDataPort::new())
    }
}
