//! Key/value settings, including the persisted engine configuration

use dipstack_core::{EngineConfig, Error, Result};
use sqlx::SqlitePool;
use tracing::warn;

const ENGINE_CONFIG_KEY: &str = "engine_config";

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(row.map(|(value,)| value))
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

/// Stored engine config, or the defaults when none is stored or the
/// stored value no longer parses or validates
pub async fn load_engine_config(pool: &SqlitePool) -> Result<EngineConfig> {
    let Some(json) = get_setting(pool, ENGINE_CONFIG_KEY).await? else {
        return Ok(EngineConfig::default());
    };

    match serde_json::from_str::<EngineConfig>(&json) {
        Ok(config) if config.validate().is_ok() => Ok(config),
        Ok(_) => {
            warn!("Stored engine config is invalid, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => {
            warn!("Failed to parse stored engine config: {}", e);
            Ok(EngineConfig::default())
        }
    }
}

pub async fn save_engine_config(pool: &SqlitePool, config: &EngineConfig) -> Result<()> {
    config.validate()?;
    let json = serde_json::to_string(config)?;
    set_setting(pool, ENGINE_CONFIG_KEY, &json).await
}
