//! Core error kinds shared across the trading control plane.
//!
//! Mirrors the propagation policy in the design notes: `NotFound` collapses
//! to `None`/empty at call sites rather than surfacing, `NetworkError` and
//! `VenueError` are logged-and-swallowed during background polling but
//! surfaced in an `OrderResult` for user-initiated placement, and
//! `StrategyError` only ever stops the offending bot.

use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    NotFound(String),
    Invalid(String),
    InsufficientFunds { required: f64, available: f64 },
    VenueError(String),
    NetworkError(String),
    BundleRejected(String),
    ConfirmationTimeout { wallet_id: String },
    Storage(String),
    StrategyError { strategy_id: String, source: String },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Invalid(why) => write!(f, "invalid: {why}"),
            Self::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "insufficient funds: need {required:.4}, have {available:.4}"
            ),
            Self::VenueError(msg) => write!(f, "venue error: {msg}"),
            Self::NetworkError(msg) => write!(f, "network error: {msg}"),
            Self::BundleRejected(msg) => write!(f, "bundle rejected: {msg}"),
            Self::ConfirmationTimeout { wallet_id } => {
                write!(f, "confirmation timeout for wallet {wallet_id}")
            }
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::StrategyError {
                strategy_id,
                source,
            } => write!(f, "strategy {strategy_id} raised: {source}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::NetworkError(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
