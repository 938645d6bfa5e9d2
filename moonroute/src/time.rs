//! Clock abstraction for heartbeats and lease expiry.
//!
//! All membership and lease decisions read time through [`TimeProvider`]
//! so tests can drive expiry deterministically with
//! [`ManualTimeProvider`]. Timestamps are [`Duration`]s since the
//! provider's epoch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

/// Source of time shared by every routing component.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Time elapsed since the provider's epoch.
    fn now(&self) -> Duration;

    /// Wait until `duration` has passed on this clock.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock measured from the moment the provider is created.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start: Instant,
}

impl TokioTimeProvider {
    /// Create a provider whose epoch is now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeProvider for TokioTimeProvider {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test clock that only moves when [`advance`](Self::advance) is called.
///
/// Clones share the same clock. Sleepers wake once the clock has been
/// advanced past their deadline.
#[derive(Debug, Clone)]
pub struct ManualTimeProvider {
    now: Arc<watch::Sender<Duration>>,
}

impl ManualTimeProvider {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    /// Create a clock starting at `start`.
    pub fn starting_at(start: Duration) -> Self {
        let (tx, _rx) = watch::channel(start);
        Self { now: Arc::new(tx) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.send_modify(|now| *now += by);
    }

    /// Move the clock to `to`. Never moves backwards.
    pub fn set(&self, to: Duration) {
        self.now.send_modify(|now| {
            if to > *now {
                *now = to;
            }
        });
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> Duration {
        *self.now.borrow()
    }

    async fn sleep(&self, duration: Duration) {
        let mut rx = self.now.subscribe();
        let deadline = *rx.borrow_and_update() + duration;
        while *rx.borrow_and_update() < deadline {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
