//! Shared type definitions

use serde::{Deserialize, Serialize};

/// Strategy identifier (UUID v4 string assigned by the registry)
pub type StrategyId = String;

/// Holdings at or below this are treated as an empty position
pub const DUST_THRESHOLD: f64 = 1e-9;

/// Tolerance for fraction sums and cost-basis comparisons
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// A signing wallet, identified by address. Key custody lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub address: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl Wallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Addresses compare case-insensitively (hex checksums vary in casing)
    pub fn key(&self) -> String {
        self.address.to_ascii_lowercase()
    }
}

/// A single price observation, in base units per 1 target token
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub price: f64,
}

impl PriceSample {
    pub fn new(timestamp_ms: i64, price: f64) -> Self {
        Self { timestamp_ms, price }
    }

    /// Sample stamped with the current wall clock
    pub fn now(price: f64) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            price,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Trade direction relative to the target token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Result of a pre-trade quote
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub expected_out: f64,
}

/// Result of an executed swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    /// For a buy: target tokens received. For a sell: base received.
    pub amount_out: f64,
    pub tx_hash: String,
}

/// Whether `value` has reached `threshold`, allowing for float rounding in
/// derived percentages
pub fn at_or_above(value: f64, threshold: f64) -> bool {
    value + FLOAT_TOLERANCE >= threshold
}

/// Percentage change from `from` to `to`, e.g. 1.00 -> 1.05 is 5.0
pub fn pct_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}
