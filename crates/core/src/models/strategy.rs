//! Strategy definition models

use crate::errors::{Error, Result};
use crate::types::StrategyId;
use serde::{Deserialize, Serialize};

const MAX_RANGE_STEPS: u32 = 100;
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// One rung of the dip ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DipLevel {
    /// Position in the ladder, assigned on creation
    #[serde(default)]
    pub index: usize,
    /// Dip from the rolling high (%) at which this level buys
    pub threshold_pct: f64,
    /// Base-asset amount spent when this level fires
    pub buy_amount_base: f64,
}

impl DipLevel {
    pub fn new(threshold_pct: f64, buy_amount_base: f64) -> Self {
        Self {
            index: 0,
            threshold_pct,
            buy_amount_base,
        }
    }
}

/// How sell fractions are spread across a profit range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Distribution {
    #[default]
    Linear,
    /// Front-loaded: larger slices at the lower thresholds
    Aggressive,
    /// Back-loaded: larger slices at the higher thresholds
    Conservative,
}

/// Exit policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ProfitConfig {
    /// Sell everything once profit reaches `target_pct`
    #[serde(rename_all = "camelCase")]
    Simple { target_pct: f64 },
    /// Sell in `steps` slices between `min_pct` and `max_pct` profit
    #[serde(rename_all = "camelCase")]
    Range {
        min_pct: f64,
        max_pct: f64,
        steps: u32,
        #[serde(default)]
        distribution: Distribution,
    },
}

impl ProfitConfig {
    fn validate(&self) -> Result<()> {
        match *self {
            ProfitConfig::Simple { target_pct } => {
                if !target_pct.is_finite() || target_pct <= 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "profit target must be positive, got {}",
                        target_pct
                    )));
                }
            }
            ProfitConfig::Range {
                min_pct,
                max_pct,
                steps,
                ..
            } => {
                if !min_pct.is_finite() || !max_pct.is_finite() || min_pct < 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "profit range must be finite and non-negative, got [{}, {}]",
                        min_pct, max_pct
                    )));
                }
                if steps == 0 || steps > MAX_RANGE_STEPS {
                    return Err(Error::InvalidConfig(format!(
                        "profit range steps must be within 1..={}, got {}",
                        MAX_RANGE_STEPS, steps
                    )));
                }
                let ordered = if steps == 1 {
                    min_pct <= max_pct
                } else {
                    min_pct < max_pct
                };
                if !ordered {
                    return Err(Error::InvalidConfig(format!(
                        "profit range min {} must be below max {}",
                        min_pct, max_pct
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_dip_timeframe_ms() -> u64 { 3_600_000 }
fn default_max_slippage_pct() -> f64 { 1.0 }
fn default_poll_interval_ms() -> u64 { 15_000 }

/// User-supplied strategy parameters (everything except identity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub name: String,
    pub base_token: String,
    pub target_token: String,
    /// Minimum dip (%) before any level is considered
    pub dip_threshold_pct: f64,
    /// Trailing window for the rolling high
    #[serde(default = "default_dip_timeframe_ms")]
    pub dip_timeframe_ms: u64,
    /// Dip ladder, ascending by threshold
    pub levels: Vec<DipLevel>,
    pub profit: ProfitConfig,
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Negative = loss cut, non-negative = profit lock
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
}

impl StrategyConfig {
    /// Check every field; returns the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("name must not be empty".into()));
        }
        if self.base_token.trim().is_empty() || self.target_token.trim().is_empty() {
            return Err(Error::InvalidConfig("token identifiers must not be empty".into()));
        }
        if self.base_token.eq_ignore_ascii_case(&self.target_token) {
            return Err(Error::InvalidConfig(format!(
                "base and target token are the same ({})",
                self.base_token
            )));
        }
        if !self.dip_threshold_pct.is_finite()
            || self.dip_threshold_pct <= 0.0
            || self.dip_threshold_pct >= 100.0
        {
            return Err(Error::InvalidConfig(format!(
                "dip threshold must be within (0, 100), got {}",
                self.dip_threshold_pct
            )));
        }
        if self.dip_timeframe_ms == 0 {
            return Err(Error::InvalidConfig("dip timeframe must be positive".into()));
        }
        if self.levels.is_empty() {
            return Err(Error::InvalidConfig("at least one dip level is required".into()));
        }

        let mut previous: Option<f64> = None;
        for (i, level) in self.levels.iter().enumerate() {
            if !level.threshold_pct.is_finite()
                || level.threshold_pct <= 0.0
                || level.threshold_pct >= 100.0
            {
                return Err(Error::InvalidConfig(format!(
                    "level {} threshold must be within (0, 100), got {}",
                    i, level.threshold_pct
                )));
            }
            if !level.buy_amount_base.is_finite() || level.buy_amount_base <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "level {} buy amount must be positive, got {}",
                    i, level.buy_amount_base
                )));
            }
            if let Some(prev) = previous {
                if level.threshold_pct <= prev {
                    return Err(Error::InvalidConfig(format!(
                        "level thresholds must be strictly ascending ({} after {})",
                        level.threshold_pct, prev
                    )));
                }
            }
            previous = Some(level.threshold_pct);
        }

        self.profit.validate()?;

        if !self.max_slippage_pct.is_finite()
            || self.max_slippage_pct < 0.0
            || self.max_slippage_pct > 100.0
        {
            return Err(Error::InvalidConfig(format!(
                "max slippage must be within [0, 100], got {}",
                self.max_slippage_pct
            )));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(Error::InvalidConfig(format!(
                "poll interval must be at least {}ms, got {}",
                MIN_POLL_INTERVAL_MS, self.poll_interval_ms
            )));
        }
        if let Some(sl) = self.stop_loss_pct {
            if !sl.is_finite() || sl <= -100.0 {
                return Err(Error::InvalidConfig(format!(
                    "stop loss must be finite and above -100, got {}",
                    sl
                )));
            }
        }
        Ok(())
    }
}

/// An immutable, validated strategy definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: StrategyId,
    #[serde(flatten)]
    pub config: StrategyConfig,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Strategy {
    /// Validate `config` and freeze it under `id`. Level indices are
    /// renumbered to match ladder order.
    pub fn new(id: impl Into<StrategyId>, mut config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        for (i, level) in config.levels.iter_mut().enumerate() {
            level.index = i;
        }
        Ok(Self {
            id: id.into(),
            config,
            created_at: chrono::Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn levels(&self) -> &[DipLevel] {
        &self.config.levels
    }
}
