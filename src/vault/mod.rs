//! Advisory position-sizing machinery shared by strategies.
//!
//! Kept behind the RiskGate, not as part of it (see `scheduler::risk_gate`):
//! a strategy may consult `kelly::calculate_kelly_position` when shaping a
//! signal's requested size, but the gate itself only enforces the caps named
//! in `StrategyConfig.limits`.

pub mod kelly;

pub use kelly::{calculate_kelly_position, kelly_for_signal, KellyParams, KellyResult};
