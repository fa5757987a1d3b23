//! Trade execution
//!
//! One executor task per wallet address, shared by every strategy trading
//! with that wallet.

mod queue;

pub use queue::{spawn_trade_executor, with_timeout, TradeExecutorHandle, TradeIntent, TradePriority};

use async_trait::async_trait;
use dipstack_core::{EngineConfig, Exchange, Fill, Result, Wallet};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Where a tick sends its swaps
#[async_trait]
pub trait OrderRouter: Send + Sync {
    async fn route(&self, intent: &TradeIntent) -> Result<Fill>;
}

#[async_trait]
impl OrderRouter for TradeExecutorHandle {
    async fn route(&self, intent: &TradeIntent) -> Result<Fill> {
        self.submit(intent.clone()).await
    }
}

/// Lazily spawned executors keyed by wallet address (case-insensitive)
pub struct ExecutorPool {
    exchange: Arc<dyn Exchange>,
    config: EngineConfig,
    executors: Mutex<HashMap<String, TradeExecutorHandle>>,
}

impl ExecutorPool {
    pub fn new(exchange: Arc<dyn Exchange>, config: EngineConfig) -> Self {
        Self {
            exchange,
            config,
            executors: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `wallet`'s executor, spawning one if none is running
    pub async fn handle_for(&self, wallet: &Wallet) -> TradeExecutorHandle {
        let mut executors = self.executors.lock().await;
        let key = wallet.key();

        if let Some(handle) = executors.get(&key) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        info!("Executor pool: spawning executor for {}", wallet.address);
        let handle = spawn_trade_executor(wallet.clone(), self.exchange.clone(), &self.config);
        executors.insert(key, handle.clone());
        handle
    }

    pub async fn len(&self) -> usize {
        self.executors.lock().await.len()
    }

    /// Drop every handle; executors exit once their last user lets go
    pub async fn clear(&self) {
        self.executors.lock().await.clear();
    }
}
