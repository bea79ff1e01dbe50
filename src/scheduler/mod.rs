//! Strategy Scheduler / Bot Manager.
//!
//! Owns the strategy registry and one in-memory `BotStatus` per registered
//! strategy, drives evaluation on each strategy's own cadence, and routes
//! non-hold signals through the `RiskGate` to the `ExecutionPort`.
//!
//! Grounded in the lifecycle shape of the teacher's `vault/pool.rs` (one
//! `Arc<Mutex<...>>`-guarded map of independent workers) and the
//! interval-driven polling tasks under `scrapers/`.

pub mod risk_gate;
pub mod strategy;

pub use risk_gate::{RiskDecision, RiskGate};
pub use strategy::Strategy;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::models::{
    BotState, BotStatus, MarketTriple, Signal, StrategyConfig, StrategyContext,
};
use crate::ports::{ExecutionPort, MarketDataPort, OrderSpec, PortfolioProvider};
use crate::trade_logger::TradeLogger;
use crate::trade_store::TradeFilter;

/// Named event stream consumers subscribe to without back-pressure
/// guarantees (see design notes: "Event emitters").
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    BotStarted(String),
    BotStopped(String),
    BotPaused(String),
    BotResumed(String),
    BotErrored { id: String, error: String },
    Signals { id: String, signals: Vec<Signal> },
    Reregistered(String),
}

/// A registered strategy plus the cancellation/coalescing handles owned by
/// the scheduler for it. Every timer is an owned cancellation handle (see
/// design notes: "Timers and cancellation") released on `stop_bot`.
struct RegisteredBot {
    config: StrategyConfig,
    strategy: Arc<Mutex<Box<dyn Strategy>>>,
    /// Held only while a tick's evaluation is in flight; `try_lock` is used
    /// by the interval task to coalesce rather than queue overlapping ticks.
    tick_lock: Arc<Mutex<()>>,
    /// Persistent per-market ring buffers (spec.md §3 "bounded price history
    /// per subscribed market"), carried across ticks rather than rebuilt.
    price_history: Arc<Mutex<HashMap<MarketTriple, crate::models::PriceHistory>>>,
    interval_handle: Option<JoinHandle<()>>,
}

pub struct SchedulerDeps {
    pub trade_logger: Arc<TradeLogger>,
    pub portfolio: Arc<dyn PortfolioProvider>,
    pub execution: Arc<dyn ExecutionPort>,
    pub market_data: Arc<dyn MarketDataPort>,
    pub price_history_size: usize,
    pub recent_trades_cap: usize,
}

pub struct Scheduler {
    bots: Arc<RwLock<HashMap<String, RegisteredBot>>>,
    statuses: Arc<RwLock<HashMap<String, BotStatus>>>,
    deps: Arc<SchedulerDeps>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    /// `trade_logger` may be shared with a `BacktestEngine` or created
    /// fresh for live trading — the only controlled coupling between the
    /// two (see design notes: "Shared-vs-isolated TradeLogger").
    pub fn new(deps: SchedulerDeps) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            bots: Arc::new(RwLock::new(HashMap::new())),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            deps: Arc::new(deps),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Indexes by `config.id`; a duplicate id replaces the prior
    /// registration (stopping it first) and emits `Reregistered`.
    pub async fn register_strategy(
        &self,
        config: StrategyConfig,
        strategy: Box<dyn Strategy>,
    ) -> CoreResult<()> {
        config.validate()?;
        let id = config.id.clone();

        let replaced = {
            let bots = self.bots.read().await;
            bots.contains_key(&id)
        };
        if replaced {
            self.stop_bot(&id).await?;
            let _ = self.events.send(SchedulerEvent::Reregistered(id.clone()));
        }

        let historical_stats = self
            .deps
            .trade_logger
            .get_stats(&TradeFilter {
                strategy_id: Some(id.clone()),
                ..Default::default()
            })
            .await?;

        let mut status = BotStatus::new(id.clone());
        status.trades_count = historical_stats.total_trades;
        status.total_pnl = historical_stats.total_pnl;
        status.win_rate = historical_stats.win_rate;

        let registered = RegisteredBot {
            config,
            strategy: Arc::new(Mutex::new(strategy)),
            tick_lock: Arc::new(Mutex::new(())),
            price_history: Arc::new(Mutex::new(HashMap::new())),
            interval_handle: None,
        };

        self.bots.write().await.insert(id.clone(), registered);
        self.statuses.write().await.insert(id.clone(), status);
        info!(strategy_id = %id, "strategy registered");
        Ok(())
    }

    /// Stops the bot if running, removes in-memory state, but retains
    /// historical trades in the `TradeStore`.
    pub async fn unregister_strategy(&self, id: &str) -> CoreResult<()> {
        self.stop_bot(id).await.ok();
        self.bots.write().await.remove(id);
        self.statuses.write().await.remove(id);
        Ok(())
    }

    pub async fn get_bot_status(&self, id: &str) -> Option<BotStatus> {
        self.statuses.read().await.get(id).cloned()
    }

    pub async fn list_bot_statuses(&self) -> Vec<BotStatus> {
        self.statuses.read().await.values().cloned().collect()
    }

    async fn set_state(&self, id: &str, state: BotState) {
        if let Some(status) = self.statuses.write().await.get_mut(id) {
            status.state = state;
        }
    }

    /// `startBot`: calls `Strategy::init` once, sets `startedAt`, schedules
    /// evaluation every `intervalMs`, and runs one immediate evaluation.
    pub async fn start_bot(&self, id: &str) -> CoreResult<()> {
        let (config, strategy, tick_lock, price_history) = {
            let bots = self.bots.read().await;
            let bot = bots
                .get(id)
                .ok_or_else(|| CoreError::NotFound(format!("strategy {id}")))?;
            (
                bot.config.clone(),
                bot.strategy.clone(),
                bot.tick_lock.clone(),
                bot.price_history.clone(),
            )
        };

        {
            let mut status_guard = self.statuses.write().await;
            let status = status_guard
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("strategy {id}")))?;
            status.state = BotState::Running;
            status.started_at = Some(chrono::Utc::now());
            status.last_error = None;
        }

        // Build an init-time context and call `Strategy::init` once.
        let ctx = self.build_context(&config, &price_history).await?;
        {
            let mut s = strategy.lock().await;
            if let Err(e) = s.init(&ctx).await {
                self.set_state(id, BotState::Error).await;
                if let Some(status) = self.statuses.write().await.get_mut(id) {
                    status.last_error = Some(e.to_string());
                }
                return Err(e);
            }
        }

        let interval_ms = config.interval_ms.max(1);
        let scheduler = self.clone_for_task();
        let id_owned = id.to_string();

        // Run one immediate evaluation before the periodic loop starts.
        scheduler.run_tick(&id_owned).await;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; we already ran one above.
            interval.tick().await;
            loop {
                interval.tick().await;
                // Coalesce: skip this tick if the previous evaluation is
                // still in flight rather than queuing it.
                match tick_lock.try_lock() {
                    Ok(guard) => {
                        drop(guard);
                        scheduler.run_tick(&id_owned).await;
                    }
                    Err(_) => {
                        debug!(strategy_id = %id_owned, "tick coalesced: prior evaluation in flight");
                    }
                }
            }
        });

        if let Some(bot) = self.bots.write().await.get_mut(id) {
            if let Some(old) = bot.interval_handle.replace(handle) {
                old.abort();
            }
        }

        let _ = self.events.send(SchedulerEvent::BotStarted(id.to_string()));
        Ok(())
    }

    /// `stopBot`: cancels the interval task and awaits `cleanup`.
    pub async fn stop_bot(&self, id: &str) -> CoreResult<()> {
        let (strategy, handle) = {
            let mut bots = self.bots.write().await;
            let bot = bots
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("strategy {id}")))?;
            (bot.strategy.clone(), bot.interval_handle.take())
        };

        if let Some(handle) = handle {
            handle.abort();
        }

        {
            let mut s = strategy.lock().await;
            if let Err(e) = s.cleanup().await {
                warn!(strategy_id = %id, error = %e, "strategy cleanup failed");
            }
        }

        self.set_state(id, BotState::Stopped).await;
        let _ = self.events.send(SchedulerEvent::BotStopped(id.to_string()));
        Ok(())
    }

    /// Cadence still fires but signals are dropped while paused.
    pub async fn pause_bot(&self, id: &str) -> CoreResult<()> {
        if self.get_bot_status(id).await.is_none() {
            return Err(CoreError::NotFound(format!("strategy {id}")));
        }
        self.set_state(id, BotState::Paused).await;
        let _ = self.events.send(SchedulerEvent::BotPaused(id.to_string()));
        Ok(())
    }

    pub async fn resume_bot(&self, id: &str) -> CoreResult<()> {
        if self.get_bot_status(id).await.is_none() {
            return Err(CoreError::NotFound(format!("strategy {id}")));
        }
        self.set_state(id, BotState::Running).await;
        let _ = self.events.send(SchedulerEvent::BotResumed(id.to_string()));
        Ok(())
    }

    /// Out-of-band: evaluates immediately and returns the signals without
    /// dispatching them through the risk gate / execution port.
    pub async fn evaluate_now(&self, id: &str) -> CoreResult<Vec<Signal>> {
        let (config, strategy, price_history) = {
            let bots = self.bots.read().await;
            let bot = bots
                .get(id)
                .ok_or_else(|| CoreError::NotFound(format!("strategy {id}")))?;
            (bot.config.clone(), bot.strategy.clone(), bot.price_history.clone())
        };
        let ctx = self.build_context(&config, &price_history).await?;
        let mut s = strategy.lock().await;
        s.evaluate(&ctx).await
    }

    fn clone_for_task(&self) -> Scheduler {
        Scheduler {
            bots: self.bots.clone(),
            statuses: self.statuses.clone(),
            deps: self.deps.clone(),
            events: self.events.clone(),
        }
    }

    /// Per-tick algorithm (spec.md §4.2):
    /// 1. if not running, return.
    /// 2. build a fresh `StrategyContext`.
    /// 3. call `Strategy::evaluate`; any error transitions to `Error`.
    /// 4. update `lastCheck`/`lastSignal`.
    /// 5. emit `signals`; dispatch each non-hold signal through the
    ///    `RiskGate` then the `ExecutionPort`.
    async fn run_tick(&self, id: &str) {
        let is_running = matches!(
            self.get_bot_status(id).await.map(|s| s.state),
            Some(BotState::Running)
        );
        if !is_running {
            return;
        }

        let (config, strategy, price_history) = {
            let bots = self.bots.read().await;
            let Some(bot) = bots.get(id) else { return };
            (bot.config.clone(), bot.strategy.clone(), bot.price_history.clone())
        };

        let ctx = match self.build_context(&config, &price_history).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(strategy_id = %id, error = %e, "failed to build strategy context");
                return;
            }
        };

        let signals = {
            let mut s = strategy.lock().await;
            s.evaluate(&ctx).await
        };

        let signals = match signals {
            Ok(signals) => signals,
            Err(e) => {
                self.set_state(id, BotState::Error).await;
                if let Some(status) = self.statuses.write().await.get_mut(id) {
                    status.last_error = Some(e.to_string());
                }
                let _ = self.events.send(SchedulerEvent::BotErrored {
                    id: id.to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };

        {
            let mut status_guard = self.statuses.write().await;
            if let Some(status) = status_guard.get_mut(id) {
                status.last_check = Some(chrono::Utc::now());
                status.last_signal = signals.first().cloned();
            }
        }

        let _ = self.events.send(SchedulerEvent::Signals {
            id: id.to_string(),
            signals: signals.clone(),
        });

        for signal in signals.iter().filter(|s| s.is_actionable()) {
            self.dispatch_signal(id, &config, &ctx, signal).await;
        }
    }

    async fn dispatch_signal(
        &self,
        id: &str,
        config: &StrategyConfig,
        ctx: &StrategyContext,
        signal: &Signal,
    ) {
        let last_known_price = ctx
            .price_history
            .get(&signal.market_triple())
            .and_then(|h| h.last())
            .map(|(_, p)| *p);

        let decision = RiskGate::dispatch(
            signal,
            config,
            ctx,
            &self.deps.trade_logger,
            last_known_price,
        )
        .await;

        let decision = match decision {
            Ok(d) => d,
            Err(e) => {
                error!(strategy_id = %id, error = %e, "risk gate dispatch failed");
                return;
            }
        };

        match decision {
            RiskDecision::DryRunFilled(_) => {}
            RiskDecision::Skipped { reason } => {
                debug!(strategy_id = %id, reason = %reason, "signal skipped by risk gate");
            }
            RiskDecision::Execute { size, price, .. } => {
                let spec = OrderSpec {
                    triple: signal.market_triple(),
                    side: match signal.signal_type {
                        crate::models::SignalType::Sell | crate::models::SignalType::Close => {
                            crate::models::Side::Sell
                        }
                        _ => crate::models::Side::Buy,
                    },
                    price,
                    size,
                    order_kind: crate::models::OrderKind::Market,
                    slippage_bound: None,
                };

                match self.deps.execution.place_order(spec).await {
                    Ok(result) if result.success => {
                        let trade_spec = crate::models::TradeSpec {
                            venue: signal.venue.clone(),
                            market_id: signal.market_id.clone(),
                            outcome: signal.outcome.clone(),
                            side: match signal.signal_type {
                                crate::models::SignalType::Sell
                                | crate::models::SignalType::Close => crate::models::Side::Sell,
                                _ => crate::models::Side::Buy,
                            },
                            order_kind: crate::models::OrderKind::Market,
                            price: result.avg_fill_price,
                            size: result.filled_size,
                            strategy_id: Some(config.id.clone()),
                            strategy_name: Some(config.name.clone()),
                            tags: vec![],
                            metadata: signal.meta.clone(),
                        };
                        if let Ok(trade) = self.deps.trade_logger.log_trade(trade_spec).await {
                            let _ = self
                                .deps
                                .trade_logger
                                .fill_trade(&trade.trade_id, result.avg_fill_price, result.filled_size, None)
                                .await;
                        }
                    }
                    Ok(result) => {
                        warn!(strategy_id = %id, error = ?result.error, "order placement rejected");
                    }
                    Err(e) => {
                        error!(strategy_id = %id, error = %e, "order placement failed");
                    }
                }
            }
        }
    }

    /// Builds the per-tick snapshot. Price history is a persistent ring per
    /// `MarketTriple`, carried in the bot's own `price_history` map rather
    /// than rebuilt from scratch each call — only a fresh point is appended.
    /// The tracked universe is every market named by `config.subscribed_markets()`
    /// plus every currently open position, so a strategy's history for a
    /// position keeps growing even once `market_filter` no longer names it.
    async fn build_context(
        &self,
        config: &StrategyConfig,
        price_history: &Arc<Mutex<HashMap<MarketTriple, crate::models::PriceHistory>>>,
    ) -> CoreResult<StrategyContext> {
        let snapshot = self.deps.portfolio.snapshot().await?;
        let positions: HashMap<MarketTriple, crate::models::Position> =
            snapshot.positions.into_iter().collect();

        let recent_trades = self
            .deps
            .trade_logger
            .get_trades(&TradeFilter {
                strategy_id: Some(config.id.clone()),
                limit: Some(self.deps.recent_trades_cap),
                ..Default::default()
            })
            .await?;

        let mut universe = config.subscribed_markets();
        for triple in positions.keys() {
            if !universe.contains(triple) {
                universe.push(triple.clone());
            }
        }

        let now = chrono::Utc::now();
        let mut market_metadata = HashMap::new();
        let mut price_history_snapshot: HashMap<MarketTriple, Vec<(chrono::DateTime<chrono::Utc>, f64)>> =
            HashMap::new();
        {
            let mut histories = price_history.lock().await;
            for triple in &universe {
                if let Ok(Some(price)) = self.deps.market_data.get_price(triple).await {
                    histories
                        .entry(triple.clone())
                        .or_insert_with(|| crate::models::PriceHistory::new(self.deps.price_history_size))
                        .push(now, price);
                }
                if let Some(history) = histories.get(triple) {
                    price_history_snapshot.insert(triple.clone(), history.as_slice());
                }
                if let Ok(meta) = self.deps.market_data.get_market(triple).await {
                    market_metadata.insert(triple.clone(), meta);
                }
            }
        }

        Ok(StrategyContext {
            strategy_id: config.id.clone(),
            config: config.clone(),
            portfolio_value: snapshot.value,
            balance: snapshot.balance,
            positions,
            recent_trades,
            market_metadata,
            price_history: price_history_snapshot,
            timestamp: now,
            is_backtest: false,
            orderbook: None,
        })
    }
}
