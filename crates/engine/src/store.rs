//! In-process strategy store, for embedding without a database and for tests

use async_trait::async_trait;
use dipstack_core::{Position, Result, Strategy, StrategyStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStrategyStore {
    entries: RwLock<HashMap<String, (Strategy, Position)>>,
}

impl MemoryStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StrategyStore for MemoryStrategyStore {
    async fn save(&self, strategy: &Strategy, position: &Position) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(strategy.id.clone(), (strategy.clone(), position.clone()));
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<(Strategy, Position)>> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<(Strategy, Position)>> {
        let mut all: Vec<(Strategy, Position)> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at).then_with(|| a.0.id.cmp(&b.0.id)));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }
}
