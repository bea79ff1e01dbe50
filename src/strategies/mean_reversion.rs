//! A simple moving-average mean-reversion strategy: buys when price dips
//! below its recent average by `entry_threshold_pct`, closes when it
//! reverts back above the average (or advisory stop-loss/take-profit
//! fires). Reads its tunables from `StrategyConfig.params`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::CoreResult;
use crate::models::{Signal, SignalType, StrategyContext};
use crate::scheduler::Strategy;

#[derive(Debug, Clone, Deserialize)]
struct Params {
    #[serde(default = "default_window")]
    window: usize,
    #[serde(default = "default_entry_threshold")]
    entry_threshold_pct: f64,
    #[serde(default = "default_exit_threshold")]
    exit_threshold_pct: f64,
    #[serde(default = "default_position_fraction")]
    position_fraction: f64,
}

fn default_window() -> usize {
    20
}
fn default_entry_threshold() -> f64 {
    0.02
}
fn default_exit_threshold() -> f64 {
    0.0
}
fn default_position_fraction() -> f64 {
    0.1
}

pub struct MeanReversionStrategy {
    params: Params,
}

impl MeanReversionStrategy {
    pub fn new(params_json: &serde_json::Value) -> Self {
        let params = serde_json::from_value(params_json.clone()).unwrap_or(Params {
            window: default_window(),
            entry_threshold_pct: default_entry_threshold(),
            exit_threshold_pct: default_exit_threshold(),
            position_fraction: default_position_fraction(),
        });
        Self { params }
    }
}

fn moving_average(history: &[(chrono::DateTime<chrono::Utc>, f64)], window: usize) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let slice = &history[history.len().saturating_sub(window)..];
    Some(slice.iter().map(|(_, p)| *p).sum::<f64>() / slice.len() as f64)
}

#[async_trait]
impl Strategy for MeanReversionStrategy {
    async fn evaluate(&mut self, ctx: &StrategyContext) -> CoreResult<Vec<Signal>> {
        let mut signals = Vec::new();

        for (triple, history) in &ctx.price_history {
            let Some(avg) = moving_average(history, self.params.window) else {
                continue;
            };
            let Some((_, last_price)) = history.last() else {
                continue;
            };
            let last_price = *last_price;
            let deviation = (last_price - avg) / avg;

            let has_position = ctx.positions.get(triple).map(|p| p.shares > 0.0).unwrap_or(false);

            if !has_position && deviation <= -self.params.entry_threshold_pct {
                let allocation = ctx.portfolio_value * self.params.position_fraction;
                if allocation <= 0.0 || last_price <= 0.0 {
                    continue;
                }
                signals.push(Signal {
                    signal_type: SignalType::Buy,
                    venue: triple.venue.clone(),
                    market_id: triple.market_id.clone(),
                    outcome: triple.outcome.clone(),
                    price: Some(last_price),
                    size: Some(allocation / last_price),
                    size_pct: None,
                    confidence: Some(deviation.abs().min(1.0)),
                    reason: Some(format!("price {deviation:.2%} below {}-tick average", self.params.window)),
                    meta: serde_json::json!({}),
                });
            } else if has_position && deviation >= self.params.exit_threshold_pct {
                signals.push(Signal {
                    signal_type: SignalType::Close,
                    venue: triple.venue.clone(),
                    market_id: triple.market_id.clone(),
                    outcome: triple.outcome.clone(),
                    price: Some(last_price),
                    size: None,
                    size_pct: None,
                    confidence: None,
                    reason: Some("price reverted to average".to_string()),
                    meta: serde_json::json!({}),
                });
            }
        }

        Ok(signals)
    }
}
