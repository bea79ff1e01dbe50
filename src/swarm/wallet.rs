//! Wallet registry and sufficiency checks for the `SwarmExecutor`
//! (spec.md §4.7 "Wallet selection").
//!
//! Grounded in the teacher's `vault/pool.rs` shared-state pattern
//! (`Arc<Mutex<...>>`-wrapped per-identity maps), generalised from one
//! pooled vault to N independent signing identities.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::models::SwarmWallet;
use crate::ports::PositionQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmAction {
    Buy,
    Sell,
}

/// Owns the wallet set and the cached chain positions backing sufficiency
/// checks. Mutated only from the executor's own tasks; external reads
/// return value copies.
pub struct WalletRegistry {
    wallets: RwLock<HashMap<String, SwarmWallet>>,
    min_sol_balance: f64,
}

impl WalletRegistry {
    pub fn new(wallets: Vec<SwarmWallet>, min_sol_balance: f64) -> Self {
        let map = wallets.into_iter().map(|w| (w.id.clone(), w)).collect();
        Self {
            wallets: RwLock::new(map),
            min_sol_balance,
        }
    }

    pub async fn all_enabled(&self) -> Vec<SwarmWallet> {
        self.wallets
            .read()
            .await
            .values()
            .filter(|w| w.enabled)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<SwarmWallet> {
        self.wallets.read().await.get(id).cloned()
    }

    pub async fn set_last_trade_at(&self, id: &str, at: chrono::DateTime<chrono::Utc>) {
        if let Some(w) = self.wallets.write().await.get_mut(id) {
            w.last_trade_at = Some(at);
        }
    }

    pub async fn set_sol_balance(&self, id: &str, balance: f64) {
        if let Some(w) = self.wallets.write().await.get_mut(id) {
            w.sol_balance = balance;
        }
    }

    /// Filters a candidate set down to wallets sufficient for `action` on
    /// `mint`, `amount` SOL per wallet. For `sell`, the local token-balance
    /// cache is refreshed from chain via `position_query` before the check
    /// — a sell decision never trusts a stale local cache.
    pub async fn filter_sufficient(
        &self,
        candidates: &[String],
        action: SwarmAction,
        mint: &str,
        amount: f64,
        position_query: &dyn PositionQuery,
    ) -> CoreResult<Vec<SwarmWallet>> {
        let mut eligible = Vec::new();
        for id in candidates {
            let Some(wallet) = self.get(id).await else {
                continue;
            };
            if !wallet.enabled {
                continue;
            }
            match action {
                SwarmAction::Buy => {
                    if wallet.sol_balance >= amount + self.min_sol_balance {
                        eligible.push(wallet);
                    }
                }
                SwarmAction::Sell => {
                    let position = position_query
                        .position_of(&wallet.signer_identity, mint)
                        .await?;
                    if position > 0.0 {
                        let mut wallet = wallet;
                        wallet
                            .token_balances
                            .insert(mint.to_string(), position);
                        eligible.push(wallet);
                    }
                }
            }
        }
        if eligible.is_empty() {
            return Err(CoreError::Invalid(
                "no wallet satisfies sufficiency check".into(),
            ));
        }
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedPositions(f64);

    #[async_trait]
    impl PositionQuery for FixedPositions {
        async fn position_of(&self, _signer: &str, _mint: &str) -> CoreResult<f64> {
            Ok(self.0)
        }
    }

    fn wallet(id: &str, sol: f64) -> SwarmWallet {
        SwarmWallet {
            id: id.to_string(),
            signer_identity: format!("signer-{id}"),
            public_identifier: format!("pub-{id}"),
            sol_balance: sol,
            token_balances: HashMap::new(),
            last_trade_at: None,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn buy_requires_balance_above_amount_plus_minimum() {
        let registry = WalletRegistry::new(vec![wallet("a", 1.0), wallet("b", 0.1)], 0.05);
        let ids = vec!["a".to_string(), "b".to_string()];
        let eligible = registry
            .filter_sufficient(&ids, SwarmAction::Buy, "MINT", 0.5, &FixedPositions(0.0))
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "a");
    }

    #[tokio::test]
    async fn sell_requires_positive_chain_verified_position() {
        let registry = WalletRegistry::new(vec![wallet("a", 1.0)], 0.05);
        let ids = vec!["a".to_string()];
        let err = registry
            .filter_sufficient(&ids, SwarmAction::Sell, "MINT", 0.5, &FixedPositions(0.0))
            .await;
        assert!(err.is_err());

        let ok = registry
            .filter_sufficient(&ids, SwarmAction::Sell, "MINT", 0.5, &FixedPositions(10.0))
            .await
            .unwrap();
        assert_eq!(ok.len(), 1);
    }
}
