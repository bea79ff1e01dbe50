//! BetterBot core — the trading control plane.
//!
//! Exposes the scheduler, trade logger, backtest engine, whale tracker,
//! copy trader and swarm executor as a library so the binary (and tests)
//! can assemble them against concrete venue ports.

pub mod backtest;
pub mod config;
pub mod copy_trader;
pub mod error;
pub mod models;
pub mod ports;
pub mod scheduler;
pub mod strategies;
pub mod swarm;
pub mod trade_logger;
pub mod trade_store;
pub mod vault;
pub mod whale;

pub use error::{CoreError, CoreResult};
pub use models::*;
