//! Per-wallet trade queue and executor
//!
//! Every swap for one wallet address flows through a single task, so at most
//! one submission per wallet is in flight. Orders wait in a priority heap
//! (stop-loss exits jump ahead), FIFO within a priority.

use dipstack_core::{EngineConfig, Error, Exchange, Fill, Result, StrategyId, TradeSide, Wallet};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Trade priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePriority {
    /// Dip buys and profit-taking sells
    Normal = 0,
    /// Stop-loss exits
    High = 1,
}

impl PartialOrd for TradePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TradePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// A swap a strategy wants executed
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub strategy_id: StrategyId,
    pub side: TradeSide,
    pub token_in: String,
    pub token_out: String,
    /// Buy: base spent. Sell: target tokens sold.
    pub amount_in: f64,
    pub max_slippage_pct: f64,
    pub priority: TradePriority,
    pub reason: String,
}

/// An intent waiting in the queue with its reply channel
struct QueuedOrder {
    intent: TradeIntent,
    result_tx: oneshot::Sender<Result<Fill>>,
}

/// Wrapper for BinaryHeap ordering (higher priority first)
struct PrioritizedOrder {
    order: QueuedOrder,
    /// Monotonic sequence number for FIFO within same priority
    seq: u64,
}

impl PartialEq for PrioritizedOrder {
    fn eq(&self, other: &Self) -> bool {
        self.order.intent.priority == other.order.intent.priority && self.seq == other.seq
    }
}

impl Eq for PrioritizedOrder {}

impl PartialOrd for PrioritizedOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (FIFO)
        self.order
            .intent
            .priority
            .cmp(&other.order.intent.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Handle to submit trades to one wallet's executor
#[derive(Clone)]
pub struct TradeExecutorHandle {
    wallet: Wallet,
    tx: mpsc::Sender<QueuedOrder>,
}

impl TradeExecutorHandle {
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// True once the executor task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Submit an intent and wait for its fill
    pub async fn submit(&self, intent: TradeIntent) -> Result<Fill> {
        let (result_tx, result_rx) = oneshot::channel();

        self.tx
            .send(QueuedOrder { intent, result_tx })
            .await
            .map_err(|_| Error::ExecutorUnavailable(format!("executor for {} closed", self.wallet.address)))?;

        result_rx.await.map_err(|_| {
            Error::ExecutorUnavailable(format!("executor for {} dropped the result", self.wallet.address))
        })?
    }
}

/// Spawn the executor task for `wallet`.
///
/// The task lives until every handle is dropped.
pub fn spawn_trade_executor(
    wallet: Wallet,
    exchange: Arc<dyn Exchange>,
    config: &EngineConfig,
) -> TradeExecutorHandle {
    let (tx, rx) = mpsc::channel::<QueuedOrder>(config.executor_channel_capacity);

    tokio::spawn(trade_executor_loop(
        wallet.clone(),
        rx,
        exchange,
        config.call_timeout(),
        config.executor_queue_depth,
        Duration::from_millis(config.submission_gap_ms),
    ));

    TradeExecutorHandle { wallet, tx }
}

/// Drains incoming orders into a priority heap and executes them one at a time
async fn trade_executor_loop(
    wallet: Wallet,
    mut rx: mpsc::Receiver<QueuedOrder>,
    exchange: Arc<dyn Exchange>,
    call_timeout: Duration,
    queue_depth: usize,
    submission_gap: Duration,
) {
    info!("Executor[{}]: started", wallet.address);

    let mut heap: BinaryHeap<PrioritizedOrder> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        // If heap is empty, block until we get an order
        if heap.is_empty() {
            match rx.recv().await {
                Some(order) => {
                    seq += 1;
                    heap.push(PrioritizedOrder { order, seq });
                }
                None => {
                    info!("Executor[{}]: all handles dropped, shutting down", wallet.address);
                    return;
                }
            }
        }

        // Drain any additional pending orders into the heap (non-blocking)
        while let Ok(order) = rx.try_recv() {
            if heap.len() >= queue_depth {
                warn!(
                    "Executor[{}]: queue full ({} orders), rejecting {:?} for {}",
                    wallet.address, queue_depth, order.intent.side, order.intent.strategy_id
                );
                let _ = order.result_tx.send(Err(Error::ExecutorUnavailable(format!(
                    "trade queue full ({} orders)",
                    queue_depth
                ))));
                continue;
            }
            seq += 1;
            heap.push(PrioritizedOrder { order, seq });
        }

        if let Some(prioritized) = heap.pop() {
            let QueuedOrder { intent, result_tx } = prioritized.order;
            debug!(
                "Executor[{}]: {:?} {:?} {} {} -> {} ({})",
                wallet.address,
                intent.priority,
                intent.side,
                intent.amount_in,
                intent.token_in,
                intent.token_out,
                intent.reason
            );

            let result = execute_single_trade(exchange.as_ref(), &wallet, &intent, call_timeout).await;
            match &result {
                Ok(fill) => info!(
                    "Executor[{}]: {:?} for {} filled, out {} (tx {})",
                    wallet.address, intent.side, intent.strategy_id, fill.amount_out, fill.tx_hash
                ),
                Err(e) => error!(
                    "Executor[{}]: {:?} for {} failed: {}",
                    wallet.address, intent.side, intent.strategy_id, e
                ),
            }

            // The submitter may have gone away; the trade still happened
            let _ = result_tx.send(result);

            if !submission_gap.is_zero() {
                tokio::time::sleep(submission_gap).await;
            }
        }
    }
}

/// Quote, then swap. Both calls are bounded by `call_timeout`.
async fn execute_single_trade(
    exchange: &dyn Exchange,
    wallet: &Wallet,
    intent: &TradeIntent,
    call_timeout: Duration,
) -> Result<Fill> {
    let quote = with_timeout(
        call_timeout,
        exchange.quote(&intent.token_in, &intent.token_out, intent.amount_in),
    )
    .await?;

    if !(quote.expected_out.is_finite() && quote.expected_out > 0.0) {
        return Err(Error::NoLiquidity(format!(
            "{} -> {} quoted {} for {}",
            intent.token_in, intent.token_out, quote.expected_out, intent.amount_in
        )));
    }

    let swap = async {
        match intent.side {
            TradeSide::Buy => {
                exchange
                    .buy(wallet, &intent.token_in, &intent.token_out, intent.amount_in, intent.max_slippage_pct)
                    .await
            }
            TradeSide::Sell => {
                exchange
                    .sell(wallet, &intent.token_in, &intent.token_out, intent.amount_in, intent.max_slippage_pct)
                    .await
            }
        }
    };
    with_timeout(call_timeout, swap).await
}

/// Run an external call under a deadline; elapsing maps to `Error::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockExchange;

    fn intent(priority: TradePriority, amount: f64) -> TradeIntent {
        TradeIntent {
            strategy_id: "s".into(),
            side: TradeSide::Buy,
            token_in: "WETH".into(),
            token_out: "PEPE".into(),
            amount_in: amount,
            max_slippage_pct: 1.0,
            priority,
            reason: "test".into(),
        }
    }

    #[test]
    fn test_heap_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        for (seq, (priority, amount)) in [
            (TradePriority::Normal, 1.0),
            (TradePriority::High, 2.0),
            (TradePriority::Normal, 3.0),
            (TradePriority::High, 4.0),
        ]
        .into_iter()
        .enumerate()
        {
            let (result_tx, _rx) = oneshot::channel();
            heap.push(PrioritizedOrder {
                order: QueuedOrder { intent: intent(priority, amount), result_tx },
                seq: seq as u64,
            });
        }

        let order: Vec<f64> = std::iter::from_fn(|| heap.pop())
            .map(|p| p.order.intent.amount_in)
            .collect();
        assert_eq!(order, vec![2.0, 4.0, 1.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_submission_in_flight_per_wallet() {
        let exchange = Arc::new(MockExchange::new(1.0).with_latency(Duration::from_millis(20)));
        let handle = spawn_trade_executor(Wallet::new("0xabc"), exchange.clone(), &EngineConfig::default());

        let submissions = (0..8).map(|i| {
            let handle = handle.clone();
            async move { handle.submit(intent(TradePriority::Normal, 1.0 + i as f64)).await }
        });
        let results = futures::future::join_all(submissions).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(exchange.swap_count(), 8);
        assert_eq!(exchange.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_swap_times_out() {
        let exchange = Arc::new(MockExchange::new(1.0).with_latency(Duration::from_secs(60)));
        let config = EngineConfig { call_timeout_ms: 1_000, ..EngineConfig::default() };
        let handle = spawn_trade_executor(Wallet::new("0xabc"), exchange, &config);

        let result = handle.submit(intent(TradePriority::Normal, 1.0)).await;
        assert_eq!(result, Err(Error::Timeout(1_000)));
    }

    #[tokio::test]
    async fn test_no_liquidity_skips_swap() {
        let exchange = Arc::new(MockExchange::new(1.0));
        exchange.set_liquidity(false);
        let handle = spawn_trade_executor(Wallet::new("0xabc"), exchange.clone(), &EngineConfig::default());

        let result = handle.submit(intent(TradePriority::Normal, 1.0)).await;
        assert!(matches!(result, Err(Error::NoLiquidity(_))));
        assert_eq!(exchange.swap_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_swap_reported_and_executor_keeps_serving() {
        let exchange = Arc::new(MockExchange::new(1.0));
        exchange.fail_next(Error::InsufficientFunds { required: 5.0, available: 1.0 });
        let handle = spawn_trade_executor(Wallet::new("0xabc"), exchange.clone(), &EngineConfig::default());

        let failed = handle.submit(intent(TradePriority::Normal, 5.0)).await;
        assert!(matches!(failed, Err(Error::InsufficientFunds { .. })));

        let filled = handle.submit(intent(TradePriority::Normal, 1.0)).await.unwrap();
        assert_eq!(filled.amount_out, 1.0);
        assert_eq!(exchange.swap_count(), 1);
        assert!(!handle.is_closed());
    }
}
