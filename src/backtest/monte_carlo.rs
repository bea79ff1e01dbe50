//! Resamples a completed backtest's daily returns with replacement to
//! produce compounded equity paths (spec.md §4.4 "Monte Carlo").
//!
//! RNG: seeded `ChaCha8Rng` only, for reproducibility — matching the
//! teacher's documented determinism guarantee for its own deterministic
//! backtest machinery.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::metrics::BacktestMetrics;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub probability_of_profit: f64,
    pub probability_of_major_loss: f64,
    pub expected_value: f64,
    pub simulations: usize,
}

/// Resamples `result.daily_returns` with replacement into `simulations`
/// compounded equity paths of the same length as the original, seeded for
/// reproducibility. With zero returns, returns zeros rather than failing.
pub fn monte_carlo(result: &BacktestMetrics, simulations: usize, seed: u64) -> MonteCarloResult {
    let initial = result.final_equity - result.total_return;
    if result.daily_returns.is_empty() || simulations == 0 {
        return MonteCarloResult {
            simulations,
            ..Default::default()
        };
    }

    let returns = &result.daily_returns;
    let path_len = returns.len();

    let finals: Vec<f64> = (0..simulations)
        .into_par_iter()
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
            let mut equity = initial;
            for _ in 0..path_len {
                let idx = rng.gen_range(0..returns.len());
                equity *= 1.0 + returns[idx];
            }
            equity
        })
        .collect();

    let mut sorted = finals.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let percentile = |p: f64| -> f64 {
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };

    let profitable = finals.iter().filter(|e| **e > initial).count();
    let major_loss = finals.iter().filter(|e| **e < initial * 0.7).count();
    let mean_final: f64 = finals.iter().sum::<f64>() / finals.len() as f64;

    MonteCarloResult {
        p5: percentile(0.05),
        p25: percentile(0.25),
        p50: percentile(0.50),
        p75: percentile(0.75),
        p95: percentile(0.95),
        probability_of_profit: profitable as f64 / finals.len() as f64,
        probability_of_major_loss: major_loss as f64 / finals.len() as f64,
        expected_value: mean_final - initial,
        simulations,
    }
}
