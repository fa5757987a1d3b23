//! Data models for strategies and positions

mod position;
mod strategy;

pub use position::*;
pub use strategy::*;
