//! Dipstack Persistence - SQLite storage for strategies, positions and settings

pub mod sqlite;

pub use sqlite::{Database, SqliteStrategyStore};
