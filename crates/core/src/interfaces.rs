//! Collaborator interfaces consumed by the engine
//!
//! Price discovery, swap execution and storage are owned by other
//! components; the engine only talks to them through these traits.

use crate::errors::Result;
use crate::models::{Position, Strategy};
use crate::types::{Fill, Quote, Wallet};
use async_trait::async_trait;

/// Spot price source
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Price of one unit of `token`, quoted in the strategy's base asset
    async fn current(&self, token: &str) -> Result<f64>;
}

/// Swap venue. Implementations sign with the given wallet.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Fails with `Error::NoLiquidity` when there is no route
    async fn quote(&self, token_in: &str, token_out: &str, amount: f64) -> Result<Quote>;

    /// Spend `amount_in` of `token_in` (the base asset) for `token_out`
    async fn buy(
        &self,
        wallet: &Wallet,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        max_slippage_pct: f64,
    ) -> Result<Fill>;

    /// Sell `amount_in` of `token_in` (the target token) back to `token_out`
    async fn sell(
        &self,
        wallet: &Wallet,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        max_slippage_pct: f64,
    ) -> Result<Fill>;
}

/// Durable strategy + position storage. The format is up to the implementor.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn save(&self, strategy: &Strategy, position: &Position) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<(Strategy, Position)>>;

    /// Every stored strategy, used to restore the registry on startup
    async fn load_all(&self) -> Result<Vec<(Strategy, Position)>>;

    async fn delete(&self, id: &str) -> Result<()>;
}
