//! Applied by the scheduler immediately before `ExecutionPort::place_order`.
//!
//! Scoped to the caps `StrategyConfig.limits` actually names
//! (`maxPositionSize`, `maxExposure`, `sizePct` resolution, dry-run). Kelly
//! sizing stays behind in `vault::kelly` as advisory machinery a strategy
//! may consult when shaping a signal's requested size — it is not part of
//! this gate's contract.

use std::sync::Arc;

use crate::error::CoreResult;
use crate::models::{OrderKind, Signal, StrategyConfig, StrategyContext, TradeSpec, TradeStatus};
use crate::trade_logger::TradeLogger;

#[derive(Clone)]
pub enum RiskDecision {
    /// Cleared for execution through the `ExecutionPort`.
    Execute { size: f64, price: Option<f64>, clamped: bool },
    /// Recorded as a synthetic filled trade; no external order placed.
    DryRunFilled(crate::models::Trade),
    Skipped { reason: String },
}

pub struct RiskGate;

impl RiskGate {
    /// Pure decision function: never touches the TradeLogger or any port.
    pub fn evaluate(signal: &Signal, config: &StrategyConfig, ctx: &StrategyContext) -> RiskDecision {
        let resolved_size = match Self::resolve_size(signal, ctx) {
            Ok(size) => size,
            Err(reason) => return RiskDecision::Skipped { reason },
        };

        let (size, clamped) = match config.limits.max_position_size {
            Some(max) if resolved_size > max => (max, true),
            _ => (resolved_size, false),
        };

        if let Some(max_exposure) = config.limits.max_exposure {
            let current_exposure: f64 = ctx.positions.values().map(|p| p.market_value()).sum();
            let price = signal.price.unwrap_or(1.0);
            let added = size * price;
            if current_exposure + added > max_exposure {
                return RiskDecision::Skipped {
                    reason: "exposure_exceeded".to_string(),
                };
            }
        }

        RiskDecision::Execute {
            size,
            price: signal.price,
            clamped,
        }
    }

    /// spec.md §4.3 reads `size = signal.size ?? default` but never names a
    /// `default` anywhere in the spec — no risk limit or config field
    /// carries one. Synthesizing an arbitrary magic-number position size
    /// here would be a bigger risk-gate surprise than rejecting the signal,
    /// so a signal naming neither `size` nor `sizePct` is skipped rather
    /// than silently sized. See DESIGN.md.
    fn resolve_size(signal: &Signal, ctx: &StrategyContext) -> Result<f64, String> {
        if let Some(size) = signal.size {
            return Ok(size);
        }
        if let Some(pct) = signal.size_pct {
            if ctx.portfolio_value <= 0.0 {
                return Err("no_portfolio_value".to_string());
            }
            return Ok(ctx.portfolio_value * pct);
        }
        Err("no_size".to_string())
    }

    /// Runs `evaluate`, then — when the decision clears for execution and
    /// the strategy is in dry-run mode — inserts a synthetic filled trade
    /// instead of returning an `Execute` decision to the caller.
    pub async fn dispatch(
        signal: &Signal,
        config: &StrategyConfig,
        ctx: &StrategyContext,
        logger: &Arc<TradeLogger>,
        last_known_price: Option<f64>,
    ) -> CoreResult<RiskDecision> {
        let decision = Self::evaluate(signal, config, ctx);

        let (size, price, _clamped) = match decision {
            RiskDecision::Execute { size, price, clamped } => (size, price, clamped),
            other => return Ok(other),
        };

        if !config.dry_run {
            return Ok(RiskDecision::Execute {
                size,
                price,
                clamped: _clamped,
            });
        }

        let fill_price = price.or(last_known_price).unwrap_or(0.0);
        let mut metadata = signal.meta.clone();
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("dryRun".to_string(), serde_json::Value::Bool(true));
        } else {
            metadata = serde_json::json!({ "dryRun": true });
        }

        let spec = TradeSpec {
            venue: signal.venue.clone(),
            market_id: signal.market_id.clone(),
            outcome: signal.outcome.clone(),
            side: match signal.signal_type {
                crate::models::SignalType::Sell | crate::models::SignalType::Close => crate::models::Side::Sell,
                _ => crate::models::Side::Buy,
            },
            order_kind: OrderKind::Market,
            price: fill_price,
            size,
            strategy_id: Some(config.id.clone()),
            strategy_name: Some(config.name.clone()),
            tags: vec!["dry_run".to_string()],
            metadata,
        };

        let trade = logger.log_trade(spec).await?;
        let filled = logger
            .fill_trade(&trade.trade_id, fill_price, size, None)
            .await?
            .unwrap_or(trade);
        debug_assert_eq!(filled.status, TradeStatus::Filled);

        Ok(RiskDecision::DryRunFilled(filled))
    }
}


impl std::fmt::Debug for RiskDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskDecision::Execute { size, price, clamped } => f
                .debug_struct("Execute")
                .field("size", size)
                .field("price", price)
                .field("clamped", clamped)
                .finish(),
            RiskDecision::DryRunFilled(trade) => f.debug_tuple("DryRunFilled").field(&trade.trade_id).finish(),
            RiskDecision::Skipped { reason } => f.debug_struct("Skipped").field("reason", reason).finish(),
        }
    }
}
