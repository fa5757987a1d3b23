//! Scripted collaborators for engine tests

use crate::executor::{OrderRouter, TradeIntent};
use async_trait::async_trait;
use dipstack_core::{
    DipLevel, Error, Exchange, Fill, PriceFeed, ProfitConfig, Quote, Result, Strategy, StrategyConfig,
    TradeSide, Wallet,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn config_with(
    dip_threshold_pct: f64,
    levels: Vec<DipLevel>,
    profit: ProfitConfig,
    stop_loss_pct: Option<f64>,
) -> StrategyConfig {
    StrategyConfig {
        name: "test ladder".into(),
        base_token: "WETH".into(),
        target_token: "PEPE".into(),
        dip_threshold_pct,
        dip_timeframe_ms: 3_600_000,
        levels,
        profit,
        max_slippage_pct: 1.0,
        poll_interval_ms: 1_000,
        stop_loss_pct,
    }
}

pub fn strategy_with(
    dip_threshold_pct: f64,
    levels: Vec<DipLevel>,
    profit: ProfitConfig,
    stop_loss_pct: Option<f64>,
) -> Strategy {
    Strategy::new(
        uuid::Uuid::new_v4().to_string(),
        config_with(dip_threshold_pct, levels, profit, stop_loss_pct),
    )
    .unwrap()
}

/// Poll `cond` every 10ms for up to 20s
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..2_000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Router that fills every intent at a settable price
#[derive(Default)]
pub struct FixedPriceRouter {
    price: Mutex<f64>,
    fail_next: Mutex<Option<Error>>,
    zero_fills: AtomicBool,
    buys: AtomicUsize,
    sells: AtomicUsize,
}

impl FixedPriceRouter {
    pub fn new() -> Self {
        Self { price: Mutex::new(1.0), ..Self::default() }
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    pub fn fail_next(&self, error: Error) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    pub fn fill_zero(&self) {
        self.zero_fills.store(true, Ordering::SeqCst);
    }

    pub fn buys(&self) -> usize {
        self.buys.load(Ordering::SeqCst)
    }

    pub fn sells(&self) -> usize {
        self.sells.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderRouter for FixedPriceRouter {
    async fn route(&self, intent: &TradeIntent) -> Result<Fill> {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        let price = *self.price.lock().unwrap();
        let amount_out = match intent.side {
            TradeSide::Buy => {
                self.buys.fetch_add(1, Ordering::SeqCst);
                intent.amount_in / price
            }
            TradeSide::Sell => {
                self.sells.fetch_add(1, Ordering::SeqCst);
                intent.amount_in * price
            }
        };
        let amount_out = if self.zero_fills.load(Ordering::SeqCst) { 0.0 } else { amount_out };
        Ok(Fill { amount_out, tx_hash: format!("0xrouted{}", self.buys() + self.sells()) })
    }
}

/// Exchange that fills at the shared market price after an optional delay
/// and records per-wallet concurrency
pub struct MockExchange {
    price: Arc<Mutex<f64>>,
    latency: Duration,
    liquidity: AtomicBool,
    zero_fills: AtomicBool,
    fail_next: Mutex<Option<Error>>,
    swaps: AtomicUsize,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
}

impl MockExchange {
    pub fn new(price: f64) -> Self {
        Self {
            price: Arc::new(Mutex::new(price)),
            latency: Duration::ZERO,
            liquidity: AtomicBool::new(true),
            zero_fills: AtomicBool::new(false),
            fail_next: Mutex::new(None),
            swaps: AtomicUsize::new(0),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_liquidity(&self, available: bool) {
        self.liquidity.store(available, Ordering::SeqCst);
    }

    pub fn fill_zero(&self) {
        self.zero_fills.store(true, Ordering::SeqCst);
    }

    pub fn fail_next(&self, error: Error) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    pub fn swap_count(&self) -> usize {
        self.swaps.load(Ordering::SeqCst)
    }

    /// Swaps currently executing, across all wallets
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().values().sum()
    }

    /// Highest number of simultaneous swaps seen for any single wallet
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn swap(&self, wallet: &Wallet, side: TradeSide, amount_in: f64) -> Result<Fill> {
        let _guard = InFlight::enter(self, wallet.key());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }

        let n = self.swaps.fetch_add(1, Ordering::SeqCst) + 1;
        let price = *self.price.lock().unwrap();
        let amount_out = if self.zero_fills.load(Ordering::SeqCst) {
            0.0
        } else {
            match side {
                TradeSide::Buy => amount_in / price,
                TradeSide::Sell => amount_in * price,
            }
        };
        Ok(Fill { amount_out, tx_hash: format!("0xswap{}", n) })
    }
}

struct InFlight<'a> {
    exchange: &'a MockExchange,
    wallet: String,
}

impl<'a> InFlight<'a> {
    fn enter(exchange: &'a MockExchange, wallet: String) -> Self {
        let mut map = exchange.in_flight.lock().unwrap();
        let count = map.entry(wallet.clone()).or_insert(0);
        *count += 1;
        exchange.max_in_flight.fetch_max(*count, Ordering::SeqCst);
        drop(map);
        Self { exchange, wallet }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.exchange.in_flight.lock().unwrap().get_mut(&self.wallet) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn quote(&self, _token_in: &str, _token_out: &str, amount: f64) -> Result<Quote> {
        if !self.liquidity.load(Ordering::SeqCst) {
            return Err(Error::NoLiquidity("mock pool empty".into()));
        }
        Ok(Quote { expected_out: amount })
    }

    async fn buy(
        &self,
        wallet: &Wallet,
        _token_in: &str,
        _token_out: &str,
        amount_in: f64,
        _max_slippage_pct: f64,
    ) -> Result<Fill> {
        self.swap(wallet, TradeSide::Buy, amount_in).await
    }

    async fn sell(
        &self,
        wallet: &Wallet,
        _token_in: &str,
        _token_out: &str,
        amount_in: f64,
        _max_slippage_pct: f64,
    ) -> Result<Fill> {
        self.swap(wallet, TradeSide::Sell, amount_in).await
    }
}

/// Feed that serves a fixed script, then repeats the last price
pub struct ScriptedFeed {
    prices: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    latency: Duration,
    panics: bool,
    market: Option<Arc<Mutex<f64>>>,
}

impl ScriptedFeed {
    pub fn new(prices: Vec<f64>) -> Self {
        let last = prices.first().copied().unwrap_or(1.0);
        Self {
            prices: Mutex::new(prices.into()),
            last: Mutex::new(last),
            latency: Duration::ZERO,
            panics: false,
            market: None,
        }
    }

    /// Move `exchange`'s fill price along with every served price
    pub fn driving(mut self, exchange: &MockExchange) -> Self {
        self.market = Some(exchange.price.clone());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Drop the rest of the script and serve `price` from now on
    pub fn hold(&self, price: f64) {
        self.prices.lock().unwrap().clear();
        *self.last.lock().unwrap() = price;
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn current(&self, _token: &str) -> Result<f64> {
        if self.panics {
            panic!("price feed exploded");
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let price = {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.prices.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        };
        if let Some(market) = &self.market {
            *market.lock().unwrap() = price;
        }
        Ok(price)
    }
}
