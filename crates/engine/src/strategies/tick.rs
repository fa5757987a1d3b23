//! One strategy tick as a plain async function
//!
//! `tick` owns no timers and no shared state: it takes the position by value
//! and hands back the updated one together with everything that happened.
//! Swaps go through an [`OrderRouter`], so tests can drive it with scripted
//! fills.

use crate::executor::OrderRouter;
use crate::strategies::accumulation::{AccumulationDecision, AccumulationEngine};
use crate::strategies::liquidation::{LiquidationEngine, SellKind};
use crate::strategies::rolling_high::dip_pct;
use dipstack_core::{CycleClose, Error, Position, PriceSample, Strategy, TradeSide};
use tracing::{debug, info, warn};

/// Something that happened during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    Bought {
        level: usize,
        price: f64,
        dip_pct: f64,
        amount_base: f64,
        amount_out: f64,
        average_cost_basis: f64,
        tx_hash: String,
    },
    BuySuppressed {
        level: usize,
        price: f64,
        average_cost_basis: f64,
    },
    Sold {
        kind: SellKind,
        price: f64,
        profit_pct: f64,
        amount_target: f64,
        proceeds: f64,
        realized_pnl: f64,
        tx_hash: String,
    },
    CycleClosed(CycleClose),
    /// A swap failed in a way the next tick may retry
    TradeFailed {
        side: TradeSide,
        reason: String,
        error: Error,
    },
    SampleRejected {
        price: f64,
    },
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Position after every applied fill, even when `fatal` is set
    pub position: Position,
    pub actions: Vec<TickAction>,
    /// Error that must halt the strategy
    pub fatal: Option<Error>,
}

impl TickOutcome {
    fn halt(position: Position, actions: Vec<TickAction>, error: Error) -> Self {
        Self { position, actions, fatal: Some(error) }
    }
}

/// Run accumulation then liquidation for one price sample. When the
/// stop-loss is already hit, accumulation is skipped for this tick.
///
/// `rolling_high` must already include `sample`.
pub async fn tick(
    strategy: &Strategy,
    mut position: Position,
    sample: PriceSample,
    rolling_high: Option<f64>,
    router: &dyn OrderRouter,
) -> TickOutcome {
    let mut actions = Vec::new();

    if !sample.is_valid() {
        warn!("Tick[{}]: rejecting invalid price sample {}", strategy.id, sample.price);
        actions.push(TickAction::SampleRejected { price: sample.price });
        return TickOutcome { position, actions, fatal: None };
    }

    let price = sample.price;
    let dip = rolling_high.map_or(0.0, |high| dip_pct(high, price));
    debug!("Tick[{}]: price {} dip {:.2}%", strategy.id, price, dip);

    let accumulation = AccumulationEngine::new(strategy);
    let liquidation = LiquidationEngine::new(strategy);

    // A position already past its stop is exited, never averaged down first
    let stop_hit = position
        .profit_pct(price)
        .is_some_and(|profit| liquidation.stop_triggered(&position, profit));
    let decision = if stop_hit {
        AccumulationDecision::Hold
    } else {
        accumulation.evaluate(&position, price, dip)
    };

    match decision {
        AccumulationDecision::Hold => {}
        AccumulationDecision::Suppressed { level, price, average_cost_basis } => {
            debug!(
                "Tick[{}]: level {} suppressed, price {} above average {}",
                strategy.id, level, price, average_cost_basis
            );
            actions.push(TickAction::BuySuppressed { level, price, average_cost_basis });
        }
        AccumulationDecision::Buy(order) => {
            let intent = accumulation.intent(&order);
            match router.route(&intent).await {
                Ok(fill) => match accumulation.apply_fill(&mut position, &order, &fill) {
                    Ok(record) => {
                        info!(
                            "Tick[{}]: level {} bought {} for {} at {}, average now {}",
                            strategy.id,
                            record.level,
                            record.amount_out,
                            record.amount_base,
                            price,
                            record.average_cost_basis
                        );
                        actions.push(TickAction::Bought {
                            level: record.level,
                            price,
                            dip_pct: order.dip_pct,
                            amount_base: record.amount_base,
                            amount_out: record.amount_out,
                            average_cost_basis: record.average_cost_basis,
                            tx_hash: fill.tx_hash,
                        });
                    }
                    Err(e) => return TickOutcome::halt(position, actions, e),
                },
                Err(e) if e.is_recoverable() => {
                    warn!("Tick[{}]: level {} buy failed, will retry: {}", strategy.id, order.level, e);
                    actions.push(TickAction::TradeFailed { side: TradeSide::Buy, reason: intent.reason, error: e });
                }
                Err(e) => return TickOutcome::halt(position, actions, e),
            }
        }
    }

    if let Err(e) = liquidation.observe(&mut position, price) {
        return TickOutcome::halt(position, actions, e);
    }

    while let Some(order) = liquidation.next_sell(&position, price) {
        let intent = liquidation.intent(&order);
        match router.route(&intent).await {
            Ok(fill) => match liquidation.apply_fill(&mut position, &order, &fill) {
                Ok(record) => {
                    info!(
                        "Tick[{}]: {:?} sold {} at {} ({:.2}%), pnl {}",
                        strategy.id,
                        record.kind,
                        record.amount_target,
                        price,
                        order.profit_pct,
                        record.realized_pnl
                    );
                    actions.push(TickAction::Sold {
                        kind: record.kind,
                        price,
                        profit_pct: order.profit_pct,
                        amount_target: record.amount_target,
                        proceeds: record.proceeds,
                        realized_pnl: record.realized_pnl,
                        tx_hash: fill.tx_hash,
                    });
                    if let Some(close) = record.close {
                        info!(
                            "Tick[{}]: cycle {} closed ({}), pnl {}",
                            strategy.id,
                            close.cycle,
                            close.reason.as_str(),
                            close.realized_pnl
                        );
                        actions.push(TickAction::CycleClosed(close));
                    }
                }
                Err(e) => return TickOutcome::halt(position, actions, e),
            },
            Err(e) if e.is_recoverable() => {
                // Later steps wait for the next tick so ordering is kept
                warn!("Tick[{}]: {:?} sell failed, will retry: {}", strategy.id, order.kind, e);
                actions.push(TickAction::TradeFailed { side: TradeSide::Sell, reason: intent.reason, error: e });
                break;
            }
            Err(e) => return TickOutcome::halt(position, actions, e),
        }
    }

    TickOutcome { position, actions, fatal: None }
}
