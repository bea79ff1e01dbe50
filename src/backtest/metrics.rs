//! Equity-curve and trade statistics derived from a completed backtest run
//! (spec.md §4.4 "Output metrics"). Uses `statrs` for the Sharpe-ratio
//! mean/stddev machinery.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::models::Trade;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub win_rate: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub average_trade: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub daily_returns: Vec<f64>,
    #[serde(skip)]
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl BacktestMetrics {
    pub fn empty(initial_capital: f64) -> Self {
        Self {
            final_equity: initial_capital,
            ..Default::default()
        }
    }

    pub fn compute(
        equity_curve: &[(DateTime<Utc>, f64)],
        initial_capital: f64,
        risk_free_rate: f64,
        trades: Vec<Trade>,
        total_commission: f64,
        total_slippage: f64,
    ) -> Self {
        if equity_curve.is_empty() {
            return Self::empty(initial_capital);
        }

        let final_equity = equity_curve.last().map(|(_, e)| *e).unwrap_or(initial_capital);
        let total_return = final_equity - initial_capital;
        let total_return_pct = if initial_capital != 0.0 {
            total_return / initial_capital * 100.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = max_drawdown(equity_curve);
        let daily_returns = daily_returns(equity_curve);
        let sharpe_ratio = sharpe_ratio(&daily_returns, risk_free_rate);

        let closed: Vec<&Trade> = trades.iter().filter(|t| t.realized_pnl.is_some()).collect();
        let total_trades = trades.len() as u64;
        let winning_trades = closed
            .iter()
            .filter(|t| t.realized_pnl.unwrap_or(0.0) > 0.0)
            .count() as u64;
        let win_rate = if !closed.is_empty() {
            winning_trades as f64 / closed.len() as f64 * 100.0
        } else {
            0.0
        };

        let total_wins: f64 = closed
            .iter()
            .filter_map(|t| t.realized_pnl)
            .filter(|p| *p > 0.0)
            .sum();
        let total_losses: f64 = closed
            .iter()
            .filter_map(|t| t.realized_pnl)
            .filter(|p| *p < 0.0)
            .sum();
        let profit_factor = if total_losses == 0.0 {
            if total_wins > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            total_wins / total_losses.abs()
        };

        let total_pnl: f64 = closed.iter().filter_map(|t| t.realized_pnl).sum();
        let average_trade = if !closed.is_empty() {
            total_pnl / closed.len() as f64
        } else {
            0.0
        };

        Self {
            total_trades,
            winning_trades,
            win_rate,
            final_equity,
            total_return,
            total_return_pct,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            profit_factor,
            average_trade,
            total_commission,
            total_slippage,
            daily_returns,
            equity_curve: equity_curve.to_vec(),
        }
    }
}

/// Running-peak drawdown over the equity curve.
fn max_drawdown(equity_curve: &[(DateTime<Utc>, f64)]) -> (f64, f64) {
    let mut peak = equity_curve[0].1;
    let mut max_dd = 0.0_f64;
    let mut max_dd_pct = 0.0_f64;
    for (_, equity) in equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        let dd = peak - equity;
        let dd_pct = if peak != 0.0 { dd / peak * 100.0 } else { 0.0 };
        if dd > max_dd {
            max_dd = dd;
        }
        if dd_pct > max_dd_pct {
            max_dd_pct = dd_pct;
        }
    }
    (max_dd, max_dd_pct)
}

/// Buckets equity observations by calendar day (UTC), taking the last
/// observation of each day, and returns the day-over-day simple returns.
fn daily_returns(equity_curve: &[(DateTime<Utc>, f64)]) -> Vec<f64> {
    let mut by_day: HashMap<(i32, u32, u32), f64> = HashMap::new();
    let mut order: Vec<(i32, u32, u32)> = Vec::new();
    for (ts, equity) in equity_curve {
        let d = ts.date_naive();
        let key = (d.year(), d.month(), d.day());
        if !by_day.contains_key(&key) {
            order.push(key);
        }
        by_day.insert(key, *equity);
    }

    let mut returns = Vec::new();
    for window in order.windows(2) {
        let prev = by_day[&window[0]];
        let curr = by_day[&window[1]];
        if prev != 0.0 {
            returns.push((curr - prev) / prev);
        }
    }
    returns
}

/// Annualised Sharpe ratio: mean/stddev of daily returns, annualised by
/// `sqrt(252)`, minus `riskFreeRate/252`.
fn sharpe_ratio(daily_returns: &[f64], risk_free_rate: f64) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = daily_returns.iter().map(|r| r - daily_rf).collect();
    let mean = excess.as_slice().mean();
    let std_dev = excess.as_slice().std_dev();
    if std_dev == 0.0 || std_dev.is_nan() {
        return 0.0;
    }
    mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_equity_curve_returns_defaults() {
        let metrics = BacktestMetrics::compute(&[], 10_000.0, 0.0, vec![], 0.0, 0.0);
        assert_eq!(metrics.final_equity, 10_000.0);
        assert_eq!(metrics.total_trades, 0);
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        let base = Utc::now();
        let curve = vec![
            (base, 100.0),
            (base + chrono::Duration::days(1), 120.0),
            (base + chrono::Duration::days(2), 90.0),
            (base + chrono::Duration::days(3), 110.0),
        ];
        let (dd, dd_pct) = max_drawdown(&curve);
        assert!((dd - 30.0).abs() < 1e-9);
        assert!((dd_pct - 25.0).abs() < 1e-9);
    }
}
