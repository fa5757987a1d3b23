//! Dipstack Engine - Dip accumulation, staged exits and the controllers that run them

pub mod controller;
pub mod events;
pub mod executor;
pub mod logging;
pub mod registry;
pub mod store;
pub mod strategies;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{ControllerContext, ControllerStatus, StrategyController};
pub use events::{EventBus, StrategyEvent};
pub use executor::{ExecutorPool, OrderRouter, TradeExecutorHandle, TradeIntent, TradePriority};
pub use registry::{BulkReport, StrategyRegistry, StrategySummary};
pub use store::MemoryStrategyStore;
