//! Example `Strategy` implementations exercised by the CLI and by the
//! scheduler/backtest integration tests. Not part of the core contracts —
//! a strategy author supplies their own types implementing
//! `scheduler::Strategy`.

pub mod mean_reversion;

pub use mean_reversion::MeanReversionStrategy;
