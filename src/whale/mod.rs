//! Whale Tracker: ingests large trades and position changes from an
//! external venue, classifies them, and exposes bounded snapshots for the
//! `CopyTrader` and operator queries (spec.md §4.5).
//!
//! Grounded in the teacher's `scrapers/dome_tracker.rs` (rate-limited
//! polling client, retry/backoff shape) and `signals/wallet_analytics.rs`
//! (whale/profile aggregation), generalised from a Dome-specific client to
//! the opaque `MarketDataPort`/whale-feed ports of §6.

pub mod tracker;

pub use tracker::{WhaleEvent, WhaleFeedPort, WhaleTracker, WhaleTrackerConfig};
