//! SQLite database management

mod connection;
mod settings;
mod strategies;

pub use connection::Database;
pub use settings::*;
pub use strategies::*;
