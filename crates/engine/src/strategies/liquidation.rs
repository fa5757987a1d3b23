//! Exit rules: stop-loss, simple take-profit and stepped range exits

use crate::executor::{TradeIntent, TradePriority};
use dipstack_core::{
    at_or_above, CloseReason, CycleClose, Distribution, Error, Fill, LiquidationPlan, LiquidationStep,
    Position, ProfitConfig, Result, Strategy, TradeSide,
};
use serde::Serialize;

/// Profit thresholds for a range exit, evenly spaced from `min_pct` to `max_pct`
pub fn step_thresholds(min_pct: f64, max_pct: f64, steps: u32) -> Vec<f64> {
    let n = steps as usize;
    if n <= 1 {
        return vec![min_pct; n];
    }
    let span = max_pct - min_pct;
    (0..n)
        .map(|i| min_pct + span * i as f64 / (n - 1) as f64)
        .collect()
}

/// Per-step sell fractions, summing to 1.
///
/// Weights before normalisation: linear `1`, aggressive `n - i`,
/// conservative `i + 1`.
pub fn step_fractions(steps: u32, distribution: Distribution) -> Vec<f64> {
    let n = steps as usize;
    let weights: Vec<f64> = (0..n)
        .map(|i| match distribution {
            Distribution::Linear => 1.0,
            Distribution::Aggressive => (n - i) as f64,
            Distribution::Conservative => (i + 1) as f64,
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

pub fn build_plan(
    min_pct: f64,
    max_pct: f64,
    steps: u32,
    distribution: Distribution,
    position_size: f64,
) -> LiquidationPlan {
    let steps = step_thresholds(min_pct, max_pct, steps)
        .into_iter()
        .zip(step_fractions(steps, distribution))
        .map(|(threshold_profit_pct, fraction_of_position)| LiquidationStep {
            threshold_profit_pct,
            fraction_of_position,
            executed: false,
        })
        .collect();
    LiquidationPlan {
        original_position_size: position_size,
        steps,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "step")]
pub enum SellKind {
    TakeProfit,
    Step(usize),
    StopLoss,
}

impl SellKind {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            SellKind::TakeProfit => CloseReason::TakeProfit,
            SellKind::Step(_) => CloseReason::ProfitRange,
            SellKind::StopLoss => CloseReason::StopLoss,
        }
    }
}

/// A sell that is due this tick
#[derive(Debug, Clone, PartialEq)]
pub struct SellOrder {
    pub kind: SellKind,
    pub amount_target: f64,
    pub price: f64,
    pub profit_pct: f64,
}

/// Outcome of a filled sell
#[derive(Debug, Clone, PartialEq)]
pub struct SellRecord {
    pub kind: SellKind,
    pub amount_target: f64,
    pub proceeds: f64,
    pub realized_pnl: f64,
    /// Set when this sale ended the cycle
    pub close: Option<CycleClose>,
}

pub struct LiquidationEngine<'a> {
    strategy: &'a Strategy,
}

impl<'a> LiquidationEngine<'a> {
    pub fn new(strategy: &'a Strategy) -> Self {
        Self { strategy }
    }

    /// Update per-cycle exit state for `price`: the profit peak, and the
    /// range plan once profit first reaches the range minimum. Returns the
    /// current profit, or `None` for an empty position.
    pub fn observe(&self, position: &mut Position, price: f64) -> Result<Option<f64>> {
        let Some(profit_pct) = position.profit_pct(price) else {
            return Ok(None);
        };
        position.observe_profit(profit_pct);

        if let ProfitConfig::Range { min_pct, max_pct, steps, distribution } = self.strategy.config.profit {
            if position.liquidation().is_none() && at_or_above(profit_pct, min_pct) {
                let plan = build_plan(min_pct, max_pct, steps, distribution, position.total_target_held());
                position.arm_liquidation(plan)?;
            }
        }
        Ok(Some(profit_pct))
    }

    /// Stop-loss check. A negative stop fires once profit falls to it. A
    /// non-negative stop is a profit lock: it arms when the cycle's peak
    /// profit exceeds it and fires when profit falls back to it.
    pub fn stop_triggered(&self, position: &Position, profit_pct: f64) -> bool {
        let Some(stop) = self.strategy.config.stop_loss_pct else {
            return false;
        };
        if !at_or_above(stop, profit_pct) {
            return false;
        }
        if stop < 0.0 {
            return true;
        }
        position.peak_profit_pct().is_some_and(|peak| peak > stop)
    }

    /// Next sell due at `price`, stop-loss first. Call repeatedly, applying
    /// each fill, until it returns `None`.
    pub fn next_sell(&self, position: &Position, price: f64) -> Option<SellOrder> {
        let profit_pct = position.profit_pct(price)?;
        let held = position.total_target_held();

        if self.stop_triggered(position, profit_pct) {
            return Some(SellOrder { kind: SellKind::StopLoss, amount_target: held, price, profit_pct });
        }

        match self.strategy.config.profit {
            ProfitConfig::Simple { target_pct } => at_or_above(profit_pct, target_pct).then_some(SellOrder {
                kind: SellKind::TakeProfit,
                amount_target: held,
                price,
                profit_pct,
            }),
            ProfitConfig::Range { .. } => {
                let plan = position.liquidation()?;
                let step = *plan.due_steps(profit_pct).first()?;
                let amount_target = if plan.remaining() == 1 {
                    // last slice takes whatever rounding left behind
                    held
                } else {
                    (plan.steps[step].fraction_of_position * plan.original_position_size).min(held)
                };
                Some(SellOrder { kind: SellKind::Step(step), amount_target, price, profit_pct })
            }
        }
    }

    pub fn intent(&self, order: &SellOrder) -> TradeIntent {
        let config = &self.strategy.config;
        let (priority, reason) = match order.kind {
            SellKind::StopLoss => (TradePriority::High, format!("stop loss at {:.2}%", order.profit_pct)),
            SellKind::TakeProfit => (TradePriority::Normal, format!("take profit at {:.2}%", order.profit_pct)),
            SellKind::Step(i) => (TradePriority::Normal, format!("profit step {} at {:.2}%", i, order.profit_pct)),
        };
        TradeIntent {
            strategy_id: self.strategy.id.clone(),
            side: TradeSide::Sell,
            token_in: config.target_token.clone(),
            token_out: config.base_token.clone(),
            amount_in: order.amount_target,
            max_slippage_pct: config.max_slippage_pct,
            priority,
            reason,
        }
    }

    /// Fold a sell fill into the position, closing the cycle when the sale
    /// emptied it or completed the range plan.
    pub fn apply_fill(&self, position: &mut Position, order: &SellOrder, fill: &Fill) -> Result<SellRecord> {
        let realized_pnl = position.record_sell(order.amount_target, fill.amount_out)?;

        let finished = match order.kind {
            SellKind::Step(step) => {
                position.mark_step_executed(step)?;
                position.is_empty() || position.liquidation().is_some_and(|p| p.is_complete())
            }
            SellKind::TakeProfit | SellKind::StopLoss => {
                if !position.is_empty() {
                    return Err(Error::InvariantViolation(format!(
                        "{:?} sell left {} held",
                        order.kind,
                        position.total_target_held()
                    )));
                }
                true
            }
        };

        let close = finished.then(|| position.close_cycle(order.kind.close_reason()));

        Ok(SellRecord {
            kind: order.kind,
            amount_target: order.amount_target,
            proceeds: fill.amount_out,
            realized_pnl,
            close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::strategy_with;
    use dipstack_core::DipLevel;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn range(steps: u32, distribution: Distribution) -> ProfitConfig {
        ProfitConfig::Range { min_pct: 5.0, max_pct: 15.0, steps, distribution }
    }

    fn strategy(profit: ProfitConfig, stop_loss_pct: Option<f64>) -> Strategy {
        strategy_with(5.0, vec![DipLevel::new(5.0, 10.0), DipLevel::new(10.0, 20.0)], profit, stop_loss_pct)
    }

    /// One level bought: 10 base at 1.00
    fn opened(strategy: &Strategy) -> Position {
        let mut position = Position::new(&strategy.id, strategy.levels().len());
        position.record_buy(0, 10.0, 10.0).unwrap();
        position
    }

    /// Run every due sell at `price`, filling exactly at `price`
    fn sell_all_due(engine: &LiquidationEngine, position: &mut Position, price: f64) -> Vec<SellRecord> {
        engine.observe(position, price).unwrap();
        let mut records = Vec::new();
        while let Some(order) = engine.next_sell(position, price) {
            let fill = Fill { amount_out: order.amount_target * price, tx_hash: "0x".into() };
            records.push(engine.apply_fill(position, &order, &fill).unwrap());
        }
        records
    }

    #[test]
    fn test_thresholds_evenly_spaced() {
        assert_eq!(step_thresholds(5.0, 15.0, 3), vec![5.0, 10.0, 15.0]);
        assert_eq!(step_thresholds(8.0, 8.0, 1), vec![8.0]);
    }

    #[test]
    fn test_distribution_shapes() {
        let linear = step_fractions(4, Distribution::Linear);
        assert!(linear.iter().all(|f| (f - 0.25).abs() < 1e-12));

        let aggressive = step_fractions(4, Distribution::Aggressive);
        assert!(aggressive.windows(2).all(|w| w[0] > w[1]));
        assert!((aggressive[0] - 0.4).abs() < 1e-12);

        let conservative = step_fractions(4, Distribution::Conservative);
        assert!(conservative.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(step_fractions(1, Distribution::Aggressive), vec![1.0]);
    }

    #[test]
    fn test_fractions_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let steps = rng.gen_range(1..=100);
            for distribution in [Distribution::Linear, Distribution::Aggressive, Distribution::Conservative] {
                let sum: f64 = step_fractions(steps, distribution).iter().sum();
                assert!((sum - 1.0).abs() <= 1e-9, "{:?} x{} sums to {}", distribution, steps, sum);
            }
        }
    }

    #[test]
    fn test_simple_take_profit_closes_cycle() {
        let strategy = strategy(ProfitConfig::Simple { target_pct: 5.0 }, None);
        let engine = LiquidationEngine::new(&strategy);
        let mut position = opened(&strategy);

        assert!(sell_all_due(&engine, &mut position, 1.04).is_empty());

        let records = sell_all_due(&engine, &mut position, 1.05);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SellKind::TakeProfit);
        assert!((records[0].realized_pnl - 0.5).abs() < 1e-9);
        assert_eq!(records[0].close.as_ref().map(|c| c.reason), Some(CloseReason::TakeProfit));
        assert!(position.is_empty());
        assert!(!position.level_executed(0));
    }

    #[test]
    fn test_range_sells_one_step_per_threshold() {
        let strategy = strategy(range(3, Distribution::Linear), None);
        let engine = LiquidationEngine::new(&strategy);
        let mut position = opened(&strategy);

        let first = sell_all_due(&engine, &mut position, 1.06);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, SellKind::Step(0));
        assert!((first[0].amount_target - 10.0 / 3.0).abs() < 1e-9);
        // average is unchanged by a partial sale
        assert!((position.average_cost_basis().unwrap() - 1.0).abs() < 1e-12);

        let second = sell_all_due(&engine, &mut position, 1.11);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, SellKind::Step(1));

        let third = sell_all_due(&engine, &mut position, 1.16);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].kind, SellKind::Step(2));
        assert_eq!(third[0].close.as_ref().map(|c| c.reason), Some(CloseReason::ProfitRange));
        assert!(position.is_empty());
        assert!(position.liquidation().is_none());
    }

    #[test]
    fn test_range_gap_up_runs_due_steps_in_order() {
        let strategy = strategy(range(3, Distribution::Aggressive), None);
        let engine = LiquidationEngine::new(&strategy);
        let mut position = opened(&strategy);

        let records = sell_all_due(&engine, &mut position, 1.20);
        let kinds: Vec<SellKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![SellKind::Step(0), SellKind::Step(1), SellKind::Step(2)]);
        assert!(position.is_empty());
        assert_eq!(position.cycles_completed(), 1);
    }

    #[test]
    fn test_plan_frozen_at_arming() {
        let strategy = strategy(range(2, Distribution::Linear), None);
        let engine = LiquidationEngine::new(&strategy);
        let mut position = opened(&strategy);

        sell_all_due(&engine, &mut position, 1.06);
        assert_eq!(position.liquidation().unwrap().original_position_size, 10.0);

        // a later buy does not resize the armed plan
        position.record_buy(1, 5.0, 6.0).unwrap();
        engine.observe(&mut position, 1.0).unwrap();
        assert_eq!(position.liquidation().unwrap().original_position_size, 10.0);
    }

    #[test]
    fn test_negative_stop_overrides_pending_steps() {
        let strategy = strategy(range(3, Distribution::Linear), Some(-10.0));
        let engine = LiquidationEngine::new(&strategy);
        let mut position = opened(&strategy);

        sell_all_due(&engine, &mut position, 1.06);
        assert_eq!(position.liquidation().unwrap().remaining(), 2);

        let records = sell_all_due(&engine, &mut position, 0.89);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SellKind::StopLoss);
        assert_eq!(records[0].close.as_ref().map(|c| c.reason), Some(CloseReason::StopLoss));
        assert!(position.is_empty());
    }

    #[test]
    fn test_stop_fires_exactly_at_level() {
        let strategy = strategy(ProfitConfig::Simple { target_pct: 5.0 }, Some(-10.0));
        let engine = LiquidationEngine::new(&strategy);
        let position = opened(&strategy);
        assert!(!engine.stop_triggered(&position, -9.99));
        assert!(engine.stop_triggered(&position, -10.0));
    }

    #[test]
    fn test_profit_lock_needs_peak_above_stop() {
        let strategy = strategy(ProfitConfig::Simple { target_pct: 20.0 }, Some(2.0));
        let engine = LiquidationEngine::new(&strategy);
        let mut position = opened(&strategy);

        // never been above +2%: a dip to +1% does not fire
        assert!(sell_all_due(&engine, &mut position, 1.01).is_empty());

        assert!(sell_all_due(&engine, &mut position, 1.08).is_empty());
        let records = sell_all_due(&engine, &mut position, 1.015);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SellKind::StopLoss);
        assert!(records[0].realized_pnl > 0.0);
    }

    #[test]
    fn test_stop_loss_intent_is_high_priority() {
        let strategy = strategy(ProfitConfig::Simple { target_pct: 5.0 }, Some(-10.0));
        let engine = LiquidationEngine::new(&strategy);
        let position = opened(&strategy);

        let order = engine.next_sell(&position, 0.85).unwrap();
        let intent = engine.intent(&order);
        assert_eq!(intent.priority, TradePriority::High);
        assert_eq!(intent.side, TradeSide::Sell);
        assert_eq!(intent.token_in, "PEPE");
        assert_eq!(intent.amount_in, 10.0);
    }

    #[test]
    fn test_empty_position_has_nothing_to_sell() {
        let strategy = strategy(ProfitConfig::Simple { target_pct: 5.0 }, Some(-10.0));
        let engine = LiquidationEngine::new(&strategy);
        let mut position = Position::new(&strategy.id, 2);
        assert_eq!(engine.observe(&mut position, 0.5).unwrap(), None);
        assert!(engine.next_sell(&position, 0.5).is_none());
    }
}
