//! Strategy and position persistence operations

use crate::sqlite::Database;
use async_trait::async_trait;
use dipstack_core::{Error, Position, Result, Strategy, StrategyStore};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Strategy definition joined with its position, as stored
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StrategyRow {
    pub id: String,
    pub name: String,
    pub definition: String,
    pub created_at: String,
    pub state: Option<String>,
    pub updated_at: Option<String>,
}

impl StrategyRow {
    /// Decode the JSON columns. A strategy saved without a position gets an
    /// empty one.
    pub fn decode(&self) -> Result<(Strategy, Position)> {
        let strategy: Strategy = serde_json::from_str(&self.definition)
            .map_err(|e| Error::InvalidData(format!("strategy {}: {}", self.id, e)))?;
        let position = match &self.state {
            Some(state) => serde_json::from_str(state)
                .map_err(|e| Error::InvalidData(format!("position for {}: {}", self.id, e)))?,
            None => Position::new(&strategy.id, strategy.levels().len()),
        };
        Ok((strategy, position))
    }
}

const SELECT_STRATEGIES: &str = r#"
    SELECT s.id, s.name, s.definition, s.created_at, p.state, p.updated_at
    FROM strategies s
    LEFT JOIN positions p ON p.strategy_id = s.id
"#;

/// Insert or replace a strategy definition and its position atomically
pub async fn upsert_strategy(pool: &SqlitePool, strategy: &Strategy, position: &Position) -> Result<()> {
    let definition = serde_json::to_string(strategy)?;
    let state = serde_json::to_string(position)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO strategies (id, name, definition, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET name = ?2, definition = ?3
        "#,
    )
    .bind(&strategy.id)
    .bind(strategy.name())
    .bind(&definition)
    .bind(strategy.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO positions (strategy_id, state, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(strategy_id) DO UPDATE SET state = ?2, updated_at = ?3
        "#,
    )
    .bind(&strategy.id)
    .bind(&state)
    .bind(position.updated_at().to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

pub async fn get_strategy(pool: &SqlitePool, id: &str) -> Result<Option<StrategyRow>> {
    sqlx::query_as::<_, StrategyRow>(&format!("{} WHERE s.id = ?", SELECT_STRATEGIES))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))
}

/// All strategies, oldest first
pub async fn list_strategies(pool: &SqlitePool) -> Result<Vec<StrategyRow>> {
    sqlx::query_as::<_, StrategyRow>(&format!("{} ORDER BY s.created_at ASC, s.id ASC", SELECT_STRATEGIES))
        .fetch_all(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))
}

/// Delete a strategy and its position. Returns true if a strategy was removed.
pub async fn delete_strategy(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    sqlx::query("DELETE FROM positions WHERE strategy_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let result = sqlx::query("DELETE FROM strategies WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(result.rows_affected() > 0)
}

/// [`StrategyStore`] backed by the SQLite database
#[derive(Clone)]
pub struct SqliteStrategyStore {
    db: Arc<Database>,
}

impl SqliteStrategyStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StrategyStore for SqliteStrategyStore {
    async fn save(&self, strategy: &Strategy, position: &Position) -> Result<()> {
        upsert_strategy(self.db.pool(), strategy, position).await
    }

    async fn load(&self, id: &str) -> Result<Option<(Strategy, Position)>> {
        get_strategy(self.db.pool(), id)
            .await?
            .map(|row| row.decode())
            .transpose()
    }

    async fn load_all(&self) -> Result<Vec<(Strategy, Position)>> {
        let rows = list_strategies(self.db.pool()).await?;
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(entry) => loaded.push(entry),
                Err(e) => tracing::warn!("Skipping stored strategy {}: {}", row.id, e),
            }
        }
        Ok(loaded)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        delete_strategy(self.db.pool(), id).await?;
        Ok(())
    }
}
