//! Error types and Result alias for the strategy engine

use thiserror::Error;

/// Main error type for the strategy engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("No liquidity: {0}")]
    NoLiquidity(String),

    #[error("Slippage exceeded: {0}")]
    SlippageExceeded(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Trade executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Strategy already active: {0}")]
    AlreadyActive(String),

    #[error("Strategy not active: {0}")]
    NotActive(String),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),
}

impl Error {
    /// Whether a tick that hit this error may simply be retried on the next
    /// scheduled tick. Anything else halts the controller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NoLiquidity(_)
            | Error::SlippageExceeded(_)
            | Error::InsufficientFunds { .. }
            | Error::NetworkError(_)
            | Error::Timeout(_)
            | Error::ExecutorUnavailable(_)
            | Error::DatabaseError(_)
            | Error::InvalidData(_) => true,
            Error::InvariantViolation(_)
            | Error::InvalidConfig(_)
            | Error::AlreadyActive(_)
            | Error::NotActive(_)
            | Error::StrategyNotFound(_) => false,
        }
    }

    /// Short machine-readable tag, used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoLiquidity(_) => "no_liquidity",
            Error::SlippageExceeded(_) => "slippage_exceeded",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::NetworkError(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::ExecutorUnavailable(_) => "executor_unavailable",
            Error::DatabaseError(_) => "database",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidData(_) => "invalid_data",
            Error::AlreadyActive(_) => "already_active",
            Error::NotActive(_) => "not_active",
            Error::StrategyNotFound(_) => "strategy_not_found",
        }
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
