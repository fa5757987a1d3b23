// ─── Events ──────────────────────────────────────────────────────────
//
// Everything a controller does is published on a broadcast channel. Slow
// subscribers lag and lose old events; publishing never blocks a tick.

use crate::strategies::{SellKind, TickAction};
use dipstack_core::{CloseReason, Error, StrategyId, TradeSide};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StrategyEvent {
    #[serde(rename_all = "camelCase")]
    Created { strategy_id: StrategyId, name: String },
    #[serde(rename_all = "camelCase")]
    Started { strategy_id: StrategyId, wallet: String },
    #[serde(rename_all = "camelCase")]
    Stopped { strategy_id: StrategyId },
    #[serde(rename_all = "camelCase")]
    Removed { strategy_id: StrategyId },
    #[serde(rename_all = "camelCase")]
    Bought {
        strategy_id: StrategyId,
        level: usize,
        price: f64,
        dip_pct: f64,
        amount_base: f64,
        amount_out: f64,
        average_cost_basis: f64,
        tx_hash: String,
    },
    #[serde(rename_all = "camelCase")]
    BuySuppressed {
        strategy_id: StrategyId,
        level: usize,
        price: f64,
        average_cost_basis: f64,
    },
    #[serde(rename_all = "camelCase")]
    Sold {
        strategy_id: StrategyId,
        #[serde(flatten)]
        kind: SellKind,
        price: f64,
        profit_pct: f64,
        amount_target: f64,
        proceeds: f64,
        realized_pnl: f64,
        tx_hash: String,
    },
    #[serde(rename_all = "camelCase")]
    CycleClosed {
        strategy_id: StrategyId,
        cycle: u32,
        reason: CloseReason,
        realized_pnl: f64,
    },
    /// Recoverable failure; the loop keeps going
    #[serde(rename_all = "camelCase")]
    TickFailed {
        strategy_id: StrategyId,
        side: Option<TradeSide>,
        kind: String,
        message: String,
    },
    /// The controller halted and needs a manual restart
    #[serde(rename_all = "camelCase")]
    Errored { strategy_id: StrategyId, kind: String, message: String },
}

impl StrategyEvent {
    pub fn strategy_id(&self) -> &str {
        match self {
            StrategyEvent::Created { strategy_id, .. }
            | StrategyEvent::Started { strategy_id, .. }
            | StrategyEvent::Stopped { strategy_id }
            | StrategyEvent::Removed { strategy_id }
            | StrategyEvent::Bought { strategy_id, .. }
            | StrategyEvent::BuySuppressed { strategy_id, .. }
            | StrategyEvent::Sold { strategy_id, .. }
            | StrategyEvent::CycleClosed { strategy_id, .. }
            | StrategyEvent::TickFailed { strategy_id, .. }
            | StrategyEvent::Errored { strategy_id, .. } => strategy_id,
        }
    }

    pub fn tick_failed(strategy_id: &str, side: Option<TradeSide>, error: &Error) -> Self {
        StrategyEvent::TickFailed {
            strategy_id: strategy_id.to_string(),
            side,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    pub fn errored(strategy_id: &str, error: &Error) -> Self {
        StrategyEvent::Errored {
            strategy_id: strategy_id.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    pub fn from_action(strategy_id: &str, action: &TickAction) -> Self {
        let strategy_id = strategy_id.to_string();
        match action {
            TickAction::Bought { level, price, dip_pct, amount_base, amount_out, average_cost_basis, tx_hash } => {
                StrategyEvent::Bought {
                    strategy_id,
                    level: *level,
                    price: *price,
                    dip_pct: *dip_pct,
                    amount_base: *amount_base,
                    amount_out: *amount_out,
                    average_cost_basis: *average_cost_basis,
                    tx_hash: tx_hash.clone(),
                }
            }
            TickAction::BuySuppressed { level, price, average_cost_basis } => StrategyEvent::BuySuppressed {
                strategy_id,
                level: *level,
                price: *price,
                average_cost_basis: *average_cost_basis,
            },
            TickAction::Sold { kind, price, profit_pct, amount_target, proceeds, realized_pnl, tx_hash } => {
                StrategyEvent::Sold {
                    strategy_id,
                    kind: *kind,
                    price: *price,
                    profit_pct: *profit_pct,
                    amount_target: *amount_target,
                    proceeds: *proceeds,
                    realized_pnl: *realized_pnl,
                    tx_hash: tx_hash.clone(),
                }
            }
            TickAction::CycleClosed(close) => StrategyEvent::CycleClosed {
                strategy_id,
                cycle: close.cycle,
                reason: close.reason,
                realized_pnl: close.realized_pnl,
            },
            TickAction::TradeFailed { side, error, .. } => StrategyEvent::tick_failed(&strategy_id, Some(*side), error),
            TickAction::SampleRejected { price } => StrategyEvent::TickFailed {
                strategy_id,
                side: None,
                kind: "invalid_data".to_string(),
                message: format!("rejected price sample {}", price),
            },
        }
    }
}

/// Cloneable publisher for the event stream
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StrategyEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StrategyEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StrategyEvent> {
        self.tx.subscribe()
    }
}
