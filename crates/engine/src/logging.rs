//! Tracing setup for binaries embedding the engine

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "dipstack_engine=info,dipstack_persistence=info";

/// `fmt` subscriber filtered by `RUST_LOG`, falling back to `default_filter`
pub fn subscriber(default_filter: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
}

/// Install [`subscriber`] globally. Returns false if a global subscriber
/// was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    subscriber(default_filter).try_init().is_ok()
}
