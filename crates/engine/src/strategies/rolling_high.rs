//! Rolling high over a trailing time window
//!
//! Monotonic deque: timestamps ascend front to back, prices strictly
//! descend, so the front is always the window maximum.

use dipstack_core::PriceSample;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingHighTracker {
    window_ms: i64,
    samples: VecDeque<PriceSample>,
    /// Newest timestamp seen; the window is anchored here
    latest_ms: Option<i64>,
}

impl RollingHighTracker {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            samples: VecDeque::new(),
            latest_ms: None,
        }
    }

    /// Feed one sample. Late samples are placed by timestamp.
    pub fn push(&mut self, sample: PriceSample) {
        if !sample.is_valid() {
            return;
        }

        let now = self
            .latest_ms
            .map_or(sample.timestamp_ms, |t| t.max(sample.timestamp_ms));
        self.latest_ms = Some(now);
        let cutoff = now.saturating_sub(self.window_ms);

        if sample.timestamp_ms >= cutoff {
            self.insert(sample);
        }
        self.evict(cutoff);
    }

    fn insert(&mut self, sample: PriceSample) {
        // First entry strictly newer than the sample
        let pos = self
            .samples
            .iter()
            .position(|s| s.timestamp_ms > sample.timestamp_ms)
            .unwrap_or(self.samples.len());

        // A newer entry at least as high outlives this one
        if let Some(newer) = self.samples.get(pos) {
            if newer.price >= sample.price {
                return;
            }
        }

        // Older entries that are no higher can never be the max again
        let mut pos = pos;
        while pos > 0 && self.samples[pos - 1].price <= sample.price {
            self.samples.remove(pos - 1);
            pos -= 1;
        }
        self.samples.insert(pos, sample);
    }

    fn evict(&mut self, cutoff: i64) {
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Highest price within the window, `None` before any sample
    pub fn high(&self) -> Option<f64> {
        self.samples.front().map(|s| s.price)
    }

    /// Percent below the rolling high; zero when at or above it
    pub fn dip_pct(&self, current: f64) -> Option<f64> {
        self.high().map(|high| dip_pct(high, current))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.latest_ms = None;
    }
}

/// `(high - current) / high * 100`, floored at zero
pub fn dip_pct(high: f64, current: f64) -> f64 {
    if high <= 0.0 {
        return 0.0;
    }
    ((high - current) / high * 100.0).max(0.0)
}
