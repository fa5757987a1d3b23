//! Engine-wide runtime settings

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_call_timeout_ms() -> u64 { 30_000 }
fn default_event_channel_capacity() -> usize { 256 }
fn default_executor_queue_depth() -> usize { 1_000 }
fn default_executor_channel_capacity() -> usize { 256 }

/// Knobs shared by every controller and wallet executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on any single external call (price fetch, quote, swap)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Buffered events per subscriber before lagging ones drop
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Max orders waiting in one wallet's priority heap
    #[serde(default = "default_executor_queue_depth")]
    pub executor_queue_depth: usize,
    #[serde(default = "default_executor_channel_capacity")]
    pub executor_channel_capacity: usize,
    /// Pause between consecutive submissions for the same wallet (0 = none)
    #[serde(default)]
    pub submission_gap_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            executor_queue_depth: default_executor_queue_depth(),
            executor_channel_capacity: default_executor_channel_capacity(),
            submission_gap_ms: 0,
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(Error::InvalidConfig("call timeout must be positive".into()));
        }
        if self.event_channel_capacity == 0
            || self.executor_queue_depth == 0
            || self.executor_channel_capacity == 0
        {
            return Err(Error::InvalidConfig("channel capacities must be positive".into()));
        }
        Ok(())
    }
}
