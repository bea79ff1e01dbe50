//! Two ingestion paths over a shared state (spec.md §4.5): a long-lived
//! streaming subscription to venue trade events (modelled here as a
//! reconnect-on-error poll loop, since the port boundary is opaque per
//! §6) and a periodic position poll over `trackedAddresses`.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoreResult;
use crate::models::{MarketTriple, WhaleProfile, WhaleTrade, WhalePosition};

const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);
/// Suppresses noise in the position state machine (spec.md §4.5 "ε").
const POSITION_EPSILON: f64 = 0.01;
const RECENT_TRADES_CAPACITY: usize = 1000;

/// Venue-side contract the tracker ingests from. The streaming subscription
/// is abstracted as a pollable batch fetch — `poll_trades` is expected to
/// block/await until new trades are available or the connection drops
/// (an `Err` triggers the fixed reconnect backoff).
#[async_trait]
pub trait WhaleFeedPort: Send + Sync {
    async fn poll_trades(&self) -> CoreResult<Vec<WhaleTrade>>;
    /// Returns the address's current positions, including zero-size
    /// entries for positions that have just closed.
    async fn fetch_positions(&self, address: &str) -> CoreResult<Vec<WhalePosition>>;
}

#[derive(Debug, Clone)]
pub struct WhaleTrackerConfig {
    pub min_trade_size: f64,
    pub min_position_size: f64,
    pub poll_interval_ms: u64,
}

impl Default for WhaleTrackerConfig {
    fn default() -> Self {
        Self {
            min_trade_size: 10_000.0,
            min_position_size: 5_000.0,
            poll_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WhaleEvent {
    Trade(WhaleTrade),
    PositionOpened { address: String, triple: MarketTriple },
    PositionChanged { address: String, triple: MarketTriple, delta: f64 },
    PositionClosed { address: String, triple: MarketTriple, pnl: f64 },
    NewWhale(String),
    Error(String),
}

struct TrackerState {
    tracked_addresses: HashSet<String>,
    recent_trades: VecDeque<WhaleTrade>,
    active_positions: HashMap<(String, MarketTriple), WhalePosition>,
    profiles: HashMap<String, WhaleProfile>,
}

pub struct WhaleTracker {
    feed: Arc<dyn WhaleFeedPort>,
    config: WhaleTrackerConfig,
    state: Arc<Mutex<TrackerState>>,
    events: broadcast::Sender<WhaleEvent>,
    running: Arc<AtomicBool>,
    stream_handle: SyncMutex<Option<JoinHandle<()>>>,
    poll_handle: SyncMutex<Option<JoinHandle<()>>>,
}

impl WhaleTracker {
    pub fn new(feed: Arc<dyn WhaleFeedPort>, config: WhaleTrackerConfig) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            feed,
            config,
            state: Arc::new(Mutex::new(TrackerState {
                tracked_addresses: HashSet::new(),
                recent_trades: VecDeque::with_capacity(RECENT_TRADES_CAPACITY),
                active_positions: HashMap::new(),
                profiles: HashMap::new(),
            })),
            events: tx,
            running: Arc::new(AtomicBool::new(false)),
            stream_handle: SyncMutex::new(None),
            poll_handle: SyncMutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WhaleEvent> {
        self.events.subscribe()
    }

    pub fn track_address(&self, address: impl Into<String>) {
        let state = self.state.clone();
        let address = address.into();
        tokio::spawn(async move {
            state.lock().await.tracked_addresses.insert(address);
        });
    }

    /// Spawns the streaming-reader task and the periodic poll task.
    /// Idempotent: calling `start` while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let stream_self = self.clone();
        let stream_task = tokio::spawn(async move {
            while stream_self.running.load(Ordering::SeqCst) {
                match stream_self.feed.poll_trades().await {
                    Ok(trades) => {
                        for trade in trades {
                            stream_self.ingest_trade(trade).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "whale trade stream error; reconnecting");
                        let _ = stream_self.events.send(WhaleEvent::Error(e.to_string()));
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
        });

        let poll_self = self.clone();
        let poll_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(poll_self.config.poll_interval_ms));
            while poll_self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                poll_self.poll_positions_once().await;
            }
        });

        *self.stream_handle.lock() = Some(stream_task);
        *self.poll_handle.lock() = Some(poll_task);
    }

    async fn ingest_trade(&self, trade: WhaleTrade) {
        let usd_value = trade.usd_value;

        // Auto-promotion is evaluated on every incoming trade, independent
        // of the `minTradeSize` keep-filter below (spec.md §4.5).
        if usd_value >= 5.0 * self.config.min_trade_size {
            for address in [trade.maker.clone(), trade.taker.clone()] {
                let mut state = self.state.lock().await;
                let first_seen = !state.profiles.contains_key(&address);
                state.tracked_addresses.insert(address.clone());
                let profile = state.profiles.entry(address.clone()).or_insert_with(|| WhaleProfile {
                    address: address.clone(),
                    first_seen: Some(trade.timestamp),
                    last_active: Some(trade.timestamp),
                    ..Default::default()
                });
                profile.last_active = Some(trade.timestamp);
                drop(state);
                if first_seen {
                    let _ = self.events.send(WhaleEvent::NewWhale(address));
                }
            }
        }

        if usd_value < self.config.min_trade_size {
            return;
        }

        {
            let mut state = self.state.lock().await;
            if state.recent_trades.len() >= RECENT_TRADES_CAPACITY {
                state.recent_trades.pop_front();
            }
            state.recent_trades.push_back(trade.clone());
        }
        let _ = self.events.send(WhaleEvent::Trade(trade));
    }

    async fn poll_positions_once(&self) {
        let addresses: Vec<String> = {
            let state = self.state.lock().await;
            state.tracked_addresses.iter().cloned().collect()
        };

        for address in addresses {
            let positions = match self.feed.fetch_positions(&address).await {
                Ok(p) => p,
                Err(e) => {
                    debug!(address = %address, error = %e, "position fetch failed; skipping");
                    continue;
                }
            };

            for position in positions {
                self.apply_position(&address, position).await;
            }
        }
    }

    async fn apply_position(&self, address: &str, position: WhalePosition) {
        let triple = MarketTriple::new("__whale__", position.market_id.clone(), position.outcome.clone());
        let key = (address.to_string(), triple.clone());

        let mut state = self.state.lock().await;
        let old = state.active_positions.get(&key).cloned();

        match old {
            None => {
                if position.size > 0.0 && position.usd_value >= self.config.min_position_size {
                    state.active_positions.insert(key, position);
                    drop(state);
                    let _ = self.events.send(WhaleEvent::PositionOpened {
                        address: address.to_string(),
                        triple,
                    });
                }
            }
            Some(old_position) => {
                if position.size.abs() < POSITION_EPSILON {
                    state.active_positions.remove(&key);
                    let pnl = old_position.unrealized_pnl;
                    let won = pnl > 0.0;
                    let return_pct = if old_position.avg_entry_price != 0.0 {
                        pnl / (old_position.avg_entry_price * old_position.size.abs().max(1.0))
                    } else {
                        0.0
                    };
                    if let Some(profile) = state.profiles.get_mut(address) {
                        profile.record_closed_position(won, return_pct);
                    }
                    drop(state);
                    let _ = self.events.send(WhaleEvent::PositionClosed {
                        address: address.to_string(),
                        triple,
                        pnl,
                    });
                } else if (position.size - old_position.size).abs() > POSITION_EPSILON {
                    let delta = position.size - old_position.size;
                    state.active_positions.insert(key, position);
                    drop(state);
                    let _ = self.events.send(WhaleEvent::PositionChanged {
                        address: address.to_string(),
                        triple,
                        delta,
                    });
                }
            }
        }
    }

    /// Stops both tasks and cancels any pending reconnect timer.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.poll_handle.lock().take() {
            handle.abort();
        }
        info!("whale tracker stopped");
    }

    /// Newest-first, bounded to `limit`.
    pub async fn get_recent_trades(&self, limit: usize) -> Vec<WhaleTrade> {
        let state = self.state.lock().await;
        state
            .recent_trades
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_top_whales(&self, limit: usize) -> Vec<WhaleProfile> {
        let state = self.state.lock().await;
        let mut profiles: Vec<WhaleProfile> = state.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| b.total_value.partial_cmp(&a.total_value).unwrap());
        profiles.truncate(limit);
        profiles
    }

    pub async fn get_active_positions(&self, market_id: Option<&str>) -> Vec<WhalePosition> {
        let state = self.state.lock().await;
        state
            .active_positions
            .values()
            .filter(|p| market_id.map(|m| p.market_id == m).unwrap_or(true))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FakeFeed {
        trades: Mutex<Vec<WhaleTrade>>,
        positions: Mutex<HashMap<String, Vec<WhalePosition>>>,
        calls: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WhaleFeedPort for FakeFeed {
        async fn poll_trades(&self) -> CoreResult<Vec<WhaleTrade>> {
            // First call returns the seeded batch; subsequent calls idle
            // so the test doesn't spin indefinitely.
            if !self.calls.swap(true, Ordering::SeqCst) {
                Ok(self.trades.lock().await.drain(..).collect())
            } else {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(vec![])
            }
        }

        async fn fetch_positions(&self, address: &str) -> CoreResult<Vec<WhalePosition>> {
            Ok(self.positions.lock().await.get(address).cloned().unwrap_or_default())
        }
    }

    fn trade(maker: &str, taker: &str, usd_value: f64) -> WhaleTrade {
        WhaleTrade {
            timestamp: Utc::now(),
            market_id: "m1".to_string(),
            outcome: "yes".to_string(),
            side: crate::models::Side::Buy,
            price: 0.5,
            size: usd_value / 0.5,
            usd_value,
            maker: maker.to_string(),
            taker: taker.to_string(),
            tx_hash: None,
        }
    }

    #[tokio::test]
    async fn recent_trades_never_exceeds_capacity() {
        let feed = Arc::new(FakeFeed {
            trades: Mutex::new((0..1500).map(|_| trade("m", "t", 20_000.0)).collect()),
            positions: Mutex::new(HashMap::new()),
            calls: Arc::new(AtomicBool::new(false)),
        });
        let tracker = WhaleTracker::new(feed, WhaleTrackerConfig::default());
        for t in tracker.feed.poll_trades().await.unwrap() {
            tracker.ingest_trade(t).await;
        }
        assert!(tracker.get_recent_trades(usize::MAX).await.len() <= RECENT_TRADES_CAPACITY);
    }

    #[tokio::test]
    async fn trade_below_threshold_is_dropped() {
        let feed = Arc::new(FakeFeed {
            trades: Mutex::new(vec![]),
            positions: Mutex::new(HashMap::new()),
            calls: Arc::new(AtomicBool::new(false)),
        });
        let config = WhaleTrackerConfig {
            min_trade_size: 1_000.0,
            ..Default::default()
        };
        let tracker = WhaleTracker::new(feed, config);
        tracker.ingest_trade(trade("a", "b", 500.0)).await;
        assert!(tracker.get_recent_trades(10).await.is_empty());
    }

    #[tokio::test]
    async fn large_trade_auto_promotes_addresses() {
        let feed = Arc::new(FakeFeed {
            trades: Mutex::new(vec![]),
            positions: Mutex::new(HashMap::new()),
            calls: Arc::new(AtomicBool::new(false)),
        });
        let config = WhaleTrackerConfig {
            min_trade_size: 1_000.0,
            ..Default::default()
        };
        let tracker = WhaleTracker::new(feed, config);
        let mut rx = tracker.subscribe();
        tracker.ingest_trade(trade("whale_maker", "whale_taker", 10_000.0)).await;

        let mut saw_new_whale = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, WhaleEvent::NewWhale(_)) {
                saw_new_whale = true;
            }
        }
        assert!(saw_new_whale);
        let top = tracker.get_top_whales(10).await;
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn position_state_machine_opens_changes_closes() {
        let feed = Arc::new(FakeFeed {
            trades: Mutex::new(vec![]),
            positions: Mutex::new(HashMap::new()),
            calls: Arc::new(AtomicBool::new(false)),
        });
        let tracker = WhaleTracker::new(feed, WhaleTrackerConfig::default());
        let addr = "whale1";

        let open = WhalePosition {
            address: addr.to_string(),
            market_id: "m1".to_string(),
            outcome: "yes".to_string(),
            size: 100.0,
            avg_entry_price: 0.5,
            usd_value: 5_000.0,
            unrealized_pnl: 0.0,
            last_updated: Utc::now(),
        };
        tracker.apply_position(addr, open.clone()).await;
        assert_eq!(tracker.get_active_positions(None).await.len(), 1);

        let mut changed = open.clone();
        changed.size = 150.0;
        tracker.apply_position(addr, changed).await;
        let positions = tracker.get_active_positions(None).await;
        assert_eq!(positions[0].size, 150.0);

        let mut closed = open.clone();
        closed.size = 0.0;
        closed.unrealized_pnl = 25.0;
        tracker.apply_position(addr, closed).await;
        assert!(tracker.get_active_positions(None).await.is_empty());
    }
}
