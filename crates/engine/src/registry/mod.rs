//! Strategy registry
//!
//! Holds every strategy definition and the controller currently driving
//! each one. Failures of one strategy are reported, never propagated to the
//! others.

use crate::controller::{ControllerContext, ControllerStatus, StrategyController};
use crate::events::{EventBus, StrategyEvent};
use crate::executor::{with_timeout, ExecutorPool};
use dipstack_core::{
    EngineConfig, Error, Exchange, Position, PriceFeed, Result, Strategy, StrategyConfig, StrategyId,
    StrategyStore, Wallet,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

/// One row of [`StrategyRegistry::list`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySummary {
    pub strategy: Strategy,
    pub status: ControllerStatus,
    pub wallet: Option<Wallet>,
}

/// Per-item results of a bulk start/stop
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: Vec<StrategyId>,
    pub failed: Vec<(StrategyId, Error)>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn error_for(&self, id: &str) -> Option<&Error> {
        self.failed.iter().find(|(failed, _)| failed == id).map(|(_, e)| e)
    }
}

pub struct StrategyRegistry {
    definitions: RwLock<HashMap<StrategyId, Arc<Strategy>>>,
    controllers: Mutex<HashMap<StrategyId, StrategyController>>,
    store: Arc<dyn StrategyStore>,
    executors: ExecutorPool,
    ctx: ControllerContext,
}

impl StrategyRegistry {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn StrategyStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = ControllerContext {
            feed,
            store: store.clone(),
            events: EventBus::new(config.event_channel_capacity),
            call_timeout: config.call_timeout(),
        };
        Ok(Self {
            definitions: RwLock::new(HashMap::new()),
            controllers: Mutex::new(HashMap::new()),
            store,
            executors: ExecutorPool::new(exchange, config),
            ctx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StrategyEvent> {
        self.ctx.events.subscribe()
    }

    /// Load every persisted definition. Entries that no longer validate are
    /// skipped with a warning. Returns how many were restored.
    pub async fn restore(&self) -> Result<usize> {
        let stored = with_timeout(self.ctx.call_timeout, self.store.load_all()).await?;
        let mut definitions = self.definitions.write().await;
        let mut restored = 0;

        for (strategy, position) in stored {
            if let Err(e) = strategy
                .config
                .validate()
                .and_then(|_| position.ensure_level_count(strategy.levels().len()))
            {
                warn!("Registry: skipping unrestorable strategy {}: {}", strategy.id, e);
                continue;
            }
            definitions.insert(strategy.id.clone(), Arc::new(strategy));
            restored += 1;
        }

        info!("Registry: restored {} strategies", restored);
        Ok(restored)
    }

    /// Validate and persist a new strategy with an empty position
    pub async fn create(&self, config: StrategyConfig) -> Result<StrategyId> {
        let id = uuid::Uuid::new_v4().to_string();
        let strategy = Strategy::new(id.clone(), config)?;
        let position = Position::new(&id, strategy.levels().len());

        with_timeout(self.ctx.call_timeout, self.store.save(&strategy, &position)).await?;

        info!("Registry: created strategy {} ({})", id, strategy.name());
        self.ctx.events.publish(StrategyEvent::Created {
            strategy_id: id.clone(),
            name: strategy.name().to_string(),
        });
        self.definitions.write().await.insert(id.clone(), Arc::new(strategy));
        Ok(id)
    }

    pub async fn start(&self, id: &str, wallet: Wallet) -> Result<()> {
        let strategy = self.definition(id).await?;

        // Loaded before taking the controller lock so a slow store never
        // blocks other registry calls
        let position = match with_timeout(self.ctx.call_timeout, self.store.load(id)).await? {
            Some((_, position)) => {
                position.ensure_level_count(strategy.levels().len())?;
                position
            }
            None => Position::new(id, strategy.levels().len()),
        };

        let mut controllers = self.controllers.lock().await;

        if let Some(existing) = controllers.get(id) {
            match existing.status().await {
                ControllerStatus::Active => return Err(Error::AlreadyActive(id.to_string())),
                status => {
                    info!("Registry: reaping {:?} controller for {}", status, id);
                    controllers.remove(id);
                }
            }
        }

        let router = self.executors.handle_for(&wallet).await;
        let mut controller =
            StrategyController::new(strategy, wallet.clone(), position, Arc::new(router), self.ctx.clone());
        controller.start().await?;
        controllers.insert(id.to_string(), controller);

        info!("Registry: started {} on wallet {}", id, wallet.address);
        Ok(())
    }

    /// Stop and drop the controller for `id`, returning its final position
    pub async fn stop(&self, id: &str) -> Result<Position> {
        let controller = self.controllers.lock().await.remove(id);
        let Some(mut controller) = controller else {
            return Err(Error::NotActive(id.to_string()));
        };

        let position = controller.stop().await?;
        info!("Registry: stopped {}", id);
        Ok(position)
    }

    pub async fn list(&self) -> Vec<StrategySummary> {
        let mut definitions: Vec<Arc<Strategy>> = self.definitions.read().await.values().cloned().collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let controllers = self.controllers.lock().await;
        let mut summaries = Vec::with_capacity(definitions.len());
        for strategy in definitions {
            let (status, wallet) = match controllers.get(&strategy.id) {
                Some(controller) => (controller.status().await, Some(controller.wallet().clone())),
                None => (ControllerStatus::Stopped, None),
            };
            summaries.push(StrategySummary {
                strategy: (*strategy).clone(),
                status,
                wallet,
            });
        }
        summaries
    }

    /// Live position when a controller exists, otherwise the persisted one
    pub async fn get_position(&self, id: &str) -> Result<Position> {
        let strategy = self.definition(id).await?;

        if let Some(controller) = self.controllers.lock().await.get(id) {
            return Ok(controller.position().await);
        }

        Ok(match with_timeout(self.ctx.call_timeout, self.store.load(id)).await? {
            Some((_, position)) => position,
            None => Position::new(id, strategy.levels().len()),
        })
    }

    /// Delete a strategy that is not running, with its persisted state
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.definition(id).await?;

        {
            let mut controllers = self.controllers.lock().await;
            if let Some(controller) = controllers.get(id) {
                if controller.status().await == ControllerStatus::Active {
                    return Err(Error::AlreadyActive(id.to_string()));
                }
                controllers.remove(id);
            }
        }

        with_timeout(self.ctx.call_timeout, self.store.delete(id)).await?;
        self.definitions.write().await.remove(id);

        info!("Registry: removed {}", id);
        self.ctx.events.publish(StrategyEvent::Removed {
            strategy_id: id.to_string(),
        });
        Ok(())
    }

    /// Start every known strategy on `wallet`
    pub async fn start_all(&self, wallet: &Wallet) -> BulkReport {
        let mut ids: Vec<StrategyId> = self.definitions.read().await.keys().cloned().collect();
        ids.sort();

        let mut report = BulkReport::default();
        for id in ids {
            match self.start(&id, wallet.clone()).await {
                Ok(()) => report.succeeded.push(id),
                Err(e) => {
                    warn!("Registry: failed to start {}: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    /// Stop every controller. In-flight ticks finish concurrently.
    pub async fn stop_all(&self) -> BulkReport {
        let mut ids: Vec<StrategyId> = self.controllers.lock().await.keys().cloned().collect();
        ids.sort();

        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;

        let mut report = BulkReport::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(_) => report.succeeded.push(id),
                Err(e) => {
                    warn!("Registry: failed to stop {}: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    /// Stop everything and release the wallet executors
    pub async fn shutdown(&self) -> BulkReport {
        let report = self.stop_all().await;
        self.executors.clear().await;
        info!(
            "Registry: shut down, {} stopped, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    async fn definition(&self, id: &str) -> Result<Arc<Strategy>> {
        self.definitions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::StrategyNotFound(id.to_string()))
    }
}
