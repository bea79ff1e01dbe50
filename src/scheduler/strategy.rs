//! The `Strategy` trait shared by live scheduling and backtest replay —
//! both drive the same `evaluate` function against a `StrategyContext`.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{Signal, StrategyContext};

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Called once when the bot starts, before the first evaluation.
    async fn init(&mut self, _ctx: &StrategyContext) -> CoreResult<()> {
        Ok(())
    }

    /// Called on every scheduled tick (live) or replayed tick (backtest).
    async fn evaluate(&mut self, ctx: &StrategyContext) -> CoreResult<Vec<Signal>>;

    /// Called once when the bot stops.
    async fn cleanup(&mut self) -> CoreResult<()> {
        Ok(())
    }
}
