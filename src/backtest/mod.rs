//! Deterministic tick-by-tick replay of a `Strategy` against historical
//! market events, producing the same `Trade` shape as live trading plus
//! equity-curve and risk statistics.
//!
//! Generalised from the teacher's `backtest.rs` walk-forward loop shape
//! (see `examples/cooprefr-bettersys`) from signal-replay-only to full
//! tick replay, reusing the live `Strategy` trait and `TradeLogger` so the
//! scheduler and the backtester produce byte-for-byte the same record
//! shape.

pub mod engine;
pub mod metrics;
pub mod monte_carlo;

pub use engine::{BacktestConfig, BacktestEngine, Tick};
pub use metrics::BacktestMetrics;
pub use monte_carlo::{monte_carlo, MonteCarloResult};
