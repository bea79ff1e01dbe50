//! SwarmExecutor: fans a single trading intent out across many signing
//! identities, choosing between atomic bundle submission, parallel,
//! multi-bundle, or sequential dispatch (spec.md §4.7).
//!
//! Grounded in the teacher's `vault/pool.rs` (shared per-identity state)
//! and `vault/trade_executor.rs` (single-order execution/result shape),
//! generalised to N wallets behind the opaque `ExecutionPort` and
//! `PositionQuery` ports of §6.

pub mod executor;
pub mod modes;
pub mod wallet;

pub use executor::{SwarmExecutor, SwarmIntent, SwarmTradeResult, WalletOutcome};
pub use modes::{SwarmMode, TradeAmount};
pub use wallet::{SwarmAction, WalletRegistry};
