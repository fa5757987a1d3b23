//! Dipstack Core - Shared data models, types, collaborator traits and errors

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod models;
pub mod types;

pub use config::EngineConfig;
pub use errors::{Error, Result};
pub use interfaces::*;
pub use models::*;
pub use types::*;
