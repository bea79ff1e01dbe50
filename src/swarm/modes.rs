//! Mode selection and per-wallet amount jitter for the `SwarmExecutor`
//! (spec.md §4.7 "Mode selection", "Amount variance").

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmMode {
    Parallel,
    Bundle,
    MultiBundle,
    Sequential,
}

const BUNDLE_MAX_GROUP: usize = 5;

/// `n=1 -> parallel`; `2..=5 -> bundle`; `n>5 -> multi-bundle`. A caller
/// override always wins; `bundling_disabled` forces `parallel` even for
/// n in the bundle range. `sequential` is never chosen by default — it is
/// only ever a caller override (stealth mode).
pub fn select_mode(
    wallet_count: usize,
    override_mode: Option<SwarmMode>,
    bundling_disabled: bool,
) -> SwarmMode {
    if let Some(mode) = override_mode {
        return mode;
    }
    if bundling_disabled {
        return SwarmMode::Parallel;
    }
    match wallet_count {
        0 | 1 => SwarmMode::Parallel,
        2..=BUNDLE_MAX_GROUP => SwarmMode::Bundle,
        _ => SwarmMode::MultiBundle,
    }
}

/// Splits a wallet id list into chunks of at most `BUNDLE_MAX_GROUP` for
/// `multi-bundle` mode.
pub fn chunk_for_multi_bundle<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    items
        .chunks(BUNDLE_MAX_GROUP)
        .map(|c| c.to_vec())
        .collect()
}

/// A per-wallet trade amount: either a fixed numeric amount (subject to
/// variance jitter) or a percentage of the wallet's current on-chain
/// position (never jittered — computed fresh per wallet instead).
#[derive(Debug, Clone, Copy)]
pub enum TradeAmount {
    Fixed(f64),
    Percentage(f64),
}

/// Resolves the per-wallet amount. For `Fixed`, jitters by up to
/// `±variance_pct` so coordinated flows don't look perfectly synchronised.
/// For `Percentage`, computes against `current_position` and applies no
/// jitter.
pub fn resolve_amount(
    amount: TradeAmount,
    variance_pct: f64,
    current_position: f64,
    rng: &mut impl Rng,
) -> f64 {
    match amount {
        TradeAmount::Fixed(base) => {
            if variance_pct <= 0.0 {
                base
            } else {
                let jitter = rng.gen_range(-variance_pct..=variance_pct) / 100.0;
                base * (1.0 + jitter)
            }
        }
        TradeAmount::Percentage(pct) => current_position * (pct / 100.0),
    }
}
