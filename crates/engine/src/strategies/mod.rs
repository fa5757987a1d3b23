//! Strategy logic: rolling high, dip-ladder buying, exits and the tick that ties them together

pub mod accumulation;
pub mod liquidation;
pub mod rolling_high;
pub mod tick;

pub use accumulation::{AccumulationDecision, AccumulationEngine, BuyOrder, BuyRecord};
pub use liquidation::{build_plan, step_fractions, step_thresholds, LiquidationEngine, SellKind, SellOrder, SellRecord};
pub use rolling_high::RollingHighTracker;
pub use tick::{tick, TickAction, TickOutcome};
