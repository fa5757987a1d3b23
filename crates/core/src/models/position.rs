//! Position accounting for one accumulation cycle
//!
//! The average cost basis is never stored. It is always derived from
//! `total_base_invested / total_target_held`, and every mutation goes through
//! `record_buy` / `record_sell` / `close_cycle`.

use crate::errors::{Error, Result};
use crate::types::{at_or_above, StrategyId, DUST_THRESHOLD, FLOAT_TOLERANCE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    ProfitRange,
    StopLoss,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::ProfitRange => "profit_range",
            CloseReason::StopLoss => "stop_loss",
        }
    }
}

/// One slice of a range exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationStep {
    pub threshold_profit_pct: f64,
    pub fraction_of_position: f64,
    pub executed: bool,
}

/// Range exit armed at liquidation start. Fractions refer to the position
/// size frozen at that instant, not to what is currently held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationPlan {
    pub original_position_size: f64,
    pub steps: Vec<LiquidationStep>,
}

impl LiquidationPlan {
    pub fn fraction_sum(&self) -> f64 {
        self.steps.iter().map(|s| s.fraction_of_position).sum()
    }

    pub fn remaining(&self) -> usize {
        self.steps.iter().filter(|s| !s.executed).count()
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.executed)
    }

    /// Unexecuted steps whose threshold has been reached, ascending
    pub fn due_steps(&self, profit_pct: f64) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.executed && at_or_above(profit_pct, s.threshold_profit_pct))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Summary of a closed cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleClose {
    pub cycle: u32,
    pub reason: CloseReason,
    pub realized_pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Mutable position state for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    strategy_id: StrategyId,
    total_base_invested: f64,
    total_target_held: f64,
    levels_executed: Vec<bool>,
    /// Realized PnL across all cycles
    realized_pnl: f64,
    cycle_realized_pnl: f64,
    liquidation: Option<LiquidationPlan>,
    peak_profit_pct: Option<f64>,
    cycles_completed: u32,
    last_close: Option<CycleClose>,
    opened_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(strategy_id: impl Into<StrategyId>, level_count: usize) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            total_base_invested: 0.0,
            total_target_held: 0.0,
            levels_executed: vec![false; level_count],
            realized_pnl: 0.0,
            cycle_realized_pnl: 0.0,
            liquidation: None,
            peak_profit_pct: None,
            cycles_completed: 0,
            last_close: None,
            opened_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn total_base_invested(&self) -> f64 {
        self.total_base_invested
    }

    pub fn total_target_held(&self) -> f64 {
        self.total_target_held
    }

    pub fn is_empty(&self) -> bool {
        self.total_target_held <= DUST_THRESHOLD
    }

    /// `None` while the position is empty
    pub fn average_cost_basis(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.total_base_invested / self.total_target_held)
        }
    }

    /// Unrealized profit (%) at `price` against the average cost basis
    pub fn profit_pct(&self, price: f64) -> Option<f64> {
        self.average_cost_basis()
            .filter(|avg| *avg > 0.0)
            .map(|avg| (price - avg) / avg * 100.0)
    }

    pub fn levels_executed(&self) -> &[bool] {
        &self.levels_executed
    }

    pub fn level_executed(&self, level: usize) -> bool {
        self.levels_executed.get(level).copied().unwrap_or(false)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn cycle_realized_pnl(&self) -> f64 {
        self.cycle_realized_pnl
    }

    pub fn liquidation(&self) -> Option<&LiquidationPlan> {
        self.liquidation.as_ref()
    }

    pub fn peak_profit_pct(&self) -> Option<f64> {
        self.peak_profit_pct
    }

    pub fn cycles_completed(&self) -> u32 {
        self.cycles_completed
    }

    pub fn last_close(&self) -> Option<&CycleClose> {
        self.last_close.as_ref()
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Verify a restored position still lines up with its strategy's ladder
    pub fn ensure_level_count(&self, level_count: usize) -> Result<()> {
        if self.levels_executed.len() != level_count {
            return Err(Error::InvalidData(format!(
                "position for {} tracks {} levels, strategy has {}",
                self.strategy_id,
                self.levels_executed.len(),
                level_count
            )));
        }
        Ok(())
    }

    /// Apply a filled dip buy for `level`
    pub fn record_buy(&mut self, level: usize, amount_base: f64, amount_out: f64) -> Result<()> {
        if level >= self.levels_executed.len() {
            return Err(Error::InvariantViolation(format!(
                "buy for unknown level {} ({} levels)",
                level,
                self.levels_executed.len()
            )));
        }
        if self.levels_executed[level] {
            return Err(Error::InvariantViolation(format!(
                "level {} already executed this cycle",
                level
            )));
        }
        if !(amount_base.is_finite() && amount_base > 0.0) {
            return Err(Error::InvariantViolation(format!(
                "buy spent non-positive amount {}",
                amount_base
            )));
        }
        if !(amount_out.is_finite() && amount_out > 0.0) {
            return Err(Error::InvariantViolation(format!(
                "buy fill returned non-positive amount {}",
                amount_out
            )));
        }

        if self.is_empty() {
            self.opened_at = Some(Utc::now());
        }
        self.total_base_invested += amount_base;
        self.total_target_held += amount_out;
        self.levels_executed[level] = true;
        self.touch();
        Ok(())
    }

    /// Apply a filled sell of `amount_target` for `proceeds` base. Cost basis
    /// leaves the position pro rata, so the average is unchanged. Returns the
    /// PnL realized by this sale.
    pub fn record_sell(&mut self, amount_target: f64, proceeds: f64) -> Result<f64> {
        if self.is_empty() {
            return Err(Error::InvariantViolation("sell from an empty position".into()));
        }
        if !(amount_target.is_finite() && amount_target > 0.0) {
            return Err(Error::InvariantViolation(format!(
                "sell of non-positive amount {}",
                amount_target
            )));
        }
        if amount_target > self.total_target_held * (1.0 + FLOAT_TOLERANCE) + DUST_THRESHOLD {
            return Err(Error::InvariantViolation(format!(
                "sell of {} exceeds held {}",
                amount_target, self.total_target_held
            )));
        }
        if !(proceeds.is_finite() && proceeds >= 0.0) {
            return Err(Error::InvariantViolation(format!(
                "sell fill returned invalid proceeds {}",
                proceeds
            )));
        }

        let share = (amount_target / self.total_target_held).min(1.0);
        let removed_cost = self.total_base_invested * share;
        let remaining = self.total_target_held - amount_target;

        if remaining <= DUST_THRESHOLD {
            self.total_target_held = 0.0;
            self.total_base_invested = 0.0;
        } else {
            self.total_target_held = remaining;
            self.total_base_invested -= removed_cost;
        }

        let pnl = proceeds - removed_cost;
        self.realized_pnl += pnl;
        self.cycle_realized_pnl += pnl;
        self.touch();
        Ok(pnl)
    }

    /// Track the best profit seen this cycle (arms profit-lock stops)
    pub fn observe_profit(&mut self, profit_pct: f64) {
        let peak = self.peak_profit_pct.map_or(profit_pct, |p| p.max(profit_pct));
        self.peak_profit_pct = Some(peak);
    }

    pub fn arm_liquidation(&mut self, plan: LiquidationPlan) -> Result<()> {
        if self.liquidation.is_some() {
            return Err(Error::InvariantViolation(
                "liquidation plan already armed for this cycle".into(),
            ));
        }
        if (plan.fraction_sum() - 1.0).abs() > FLOAT_TOLERANCE {
            return Err(Error::InvariantViolation(format!(
                "liquidation fractions sum to {}, expected 1",
                plan.fraction_sum()
            )));
        }
        self.liquidation = Some(plan);
        self.touch();
        Ok(())
    }

    pub fn mark_step_executed(&mut self, step: usize) -> Result<()> {
        let plan = self
            .liquidation
            .as_mut()
            .ok_or_else(|| Error::InvariantViolation("no liquidation plan armed".into()))?;
        let entry = plan
            .steps
            .get_mut(step)
            .ok_or_else(|| Error::InvariantViolation(format!("unknown liquidation step {}", step)))?;
        if entry.executed {
            return Err(Error::InvariantViolation(format!(
                "liquidation step {} already executed",
                step
            )));
        }
        entry.executed = true;
        self.touch();
        Ok(())
    }

    /// End the cycle and reset per-cycle state for the next one
    pub fn close_cycle(&mut self, reason: CloseReason) -> CycleClose {
        self.cycles_completed += 1;
        let close = CycleClose {
            cycle: self.cycles_completed,
            reason,
            realized_pnl: self.cycle_realized_pnl,
            closed_at: Utc::now(),
        };

        self.total_base_invested = 0.0;
        self.total_target_held = 0.0;
        self.levels_executed.iter_mut().for_each(|e| *e = false);
        self.liquidation = None;
        self.peak_profit_pct = None;
        self.cycle_realized_pnl = 0.0;
        self.opened_at = None;
        self.last_close = Some(close.clone());
        self.touch();
        close
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
