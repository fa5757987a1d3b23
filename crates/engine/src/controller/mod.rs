//! Per-strategy controller
//!
//! Owns one fixed-delay polling task. Each iteration fetches a price, runs
//! the tick, stores the position and publishes what happened. The next tick
//! is scheduled `poll_interval_ms` after the previous one completes, so one
//! strategy never has two ticks running.

use crate::events::{EventBus, StrategyEvent};
use crate::executor::{with_timeout, OrderRouter};
use crate::strategies::{tick, RollingHighTracker};
use dipstack_core::{Error, Position, PriceFeed, PriceSample, Result, Strategy, StrategyStore, Wallet};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControllerStatus {
    Created,
    Active,
    Stopped,
    Error,
}

/// Collaborators shared by every controller of a registry
#[derive(Clone)]
pub struct ControllerContext {
    pub feed: Arc<dyn PriceFeed>,
    pub store: Arc<dyn StrategyStore>,
    pub events: EventBus,
    pub call_timeout: Duration,
}

struct ControllerShared {
    status: RwLock<ControllerStatus>,
    position: RwLock<Position>,
    last_error: RwLock<Option<Error>>,
}

pub struct StrategyController {
    strategy: Arc<Strategy>,
    wallet: Wallet,
    router: Arc<dyn OrderRouter>,
    ctx: ControllerContext,
    shared: Arc<ControllerShared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StrategyController {
    pub fn new(
        strategy: Arc<Strategy>,
        wallet: Wallet,
        position: Position,
        router: Arc<dyn OrderRouter>,
        ctx: ControllerContext,
    ) -> Self {
        Self {
            strategy,
            wallet,
            router,
            ctx,
            shared: Arc::new(ControllerShared {
                status: RwLock::new(ControllerStatus::Created),
                position: RwLock::new(position),
                last_error: RwLock::new(None),
            }),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub async fn status(&self) -> ControllerStatus {
        *self.shared.status.read().await
    }

    /// Live position snapshot
    pub async fn position(&self) -> Position {
        self.shared.position.read().await.clone()
    }

    /// The error that moved this controller to `Error`
    pub async fn last_error(&self) -> Option<Error> {
        self.shared.last_error.read().await.clone()
    }

    /// Created -> Active. The first tick runs immediately.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut status = self.shared.status.write().await;
            match *status {
                ControllerStatus::Created => {}
                ControllerStatus::Active => return Err(Error::AlreadyActive(self.strategy.id.clone())),
                other => {
                    return Err(Error::InvariantViolation(format!(
                        "controller for {} is {:?} and cannot be restarted",
                        self.strategy.id, other
                    )))
                }
            }
            *status = ControllerStatus::Active;
        }

        self.task = Some(tokio::spawn(controller_loop(
            self.strategy.clone(),
            self.router.clone(),
            self.ctx.clone(),
            self.shared.clone(),
            self.cancel.clone(),
        )));

        info!("Controller[{}]: started with wallet {}", self.strategy.id, self.wallet.address);
        self.ctx.events.publish(StrategyEvent::Started {
            strategy_id: self.strategy.id.clone(),
            wallet: self.wallet.address.clone(),
        });
        Ok(())
    }

    /// Cancel the next tick, wait for an in-flight one, persist.
    ///
    /// A controller already in `Error` keeps that status.
    pub async fn stop(&mut self) -> Result<Position> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Controller[{}]: task ended abnormally: {}", self.strategy.id, e);
            }
        }

        {
            let mut status = self.shared.status.write().await;
            if *status != ControllerStatus::Error {
                *status = ControllerStatus::Stopped;
            }
        }

        let position = self.position().await;
        persist(&self.ctx, &self.strategy, &position).await?;

        info!("Controller[{}]: stopped", self.strategy.id);
        self.ctx.events.publish(StrategyEvent::Stopped {
            strategy_id: self.strategy.id.clone(),
        });
        Ok(position)
    }
}

impl Drop for StrategyController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn persist(ctx: &ControllerContext, strategy: &Strategy, position: &Position) -> Result<()> {
    with_timeout(ctx.call_timeout, ctx.store.save(strategy, position)).await
}

async fn controller_loop(
    strategy: Arc<Strategy>,
    router: Arc<dyn OrderRouter>,
    ctx: ControllerContext,
    shared: Arc<ControllerShared>,
    cancel: CancellationToken,
) {
    let poll = Duration::from_millis(strategy.config.poll_interval_ms);
    let mut tracker = RollingHighTracker::new(strategy.config.dip_timeframe_ms);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let fatal = match AssertUnwindSafe(run_tick(&strategy, router.as_ref(), &ctx, &shared, &mut tracker))
            .catch_unwind()
            .await
        {
            Ok(fatal) => fatal,
            Err(panic) => Some(Error::InvariantViolation(format!(
                "tick panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        if let Some(err) = fatal {
            halt(&strategy, &ctx, &shared, err).await;
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }
    }

    info!("Controller[{}]: loop exited", strategy.id);
}

/// One loop iteration. Returns the error that must halt the controller.
async fn run_tick(
    strategy: &Strategy,
    router: &dyn OrderRouter,
    ctx: &ControllerContext,
    shared: &ControllerShared,
    tracker: &mut RollingHighTracker,
) -> Option<Error> {
    let token = &strategy.config.target_token;
    let price = match with_timeout(ctx.call_timeout, ctx.feed.current(token)).await {
        Ok(price) => price,
        Err(e) if e.is_recoverable() => {
            warn!("Controller[{}]: price fetch for {} failed: {}", strategy.id, token, e);
            ctx.events.publish(StrategyEvent::tick_failed(&strategy.id, None, &e));
            return None;
        }
        Err(e) => return Some(e),
    };

    let sample = PriceSample::now(price);
    tracker.push(sample);

    let position = shared.position.read().await.clone();
    let outcome = tick(strategy, position, sample, tracker.high(), router).await;
    *shared.position.write().await = outcome.position.clone();

    for action in &outcome.actions {
        ctx.events.publish(StrategyEvent::from_action(&strategy.id, action));
    }

    if let Err(e) = persist(ctx, strategy, &outcome.position).await {
        warn!("Controller[{}]: failed to persist position: {}", strategy.id, e);
        ctx.events.publish(StrategyEvent::tick_failed(&strategy.id, None, &e));
    }

    outcome.fatal
}

async fn halt(strategy: &Strategy, ctx: &ControllerContext, shared: &ControllerShared, err: Error) {
    error!("Controller[{}]: halting: {}", strategy.id, err);

    *shared.status.write().await = ControllerStatus::Error;
    *shared.last_error.write().await = Some(err.clone());

    let position = shared.position.read().await.clone();
    if let Err(e) = persist(ctx, strategy, &position).await {
        warn!("Controller[{}]: failed to persist position on halt: {}", strategy.id, e);
    }

    ctx.events.publish(StrategyEvent::errored(&strategy.id, &err));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
