//! Manual clock for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cfstore::TimeEffects;
use parking_lot::Mutex;

/// Clock that never waits.
///
/// Every [`timestamp`](TimeEffects::timestamp) call returns the next value of a
/// counter (`t1`, `t2`, ...). Sleeps are recorded and return after yielding once.
#[derive(Debug, Default)]
pub struct ManualTimeHandler {
    ticks: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualTimeHandler {
    /// Create a clock at tick zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Forget recorded sleeps
    pub fn clear_sleeps(&self) {
        self.sleeps.lock().clear();
    }

    /// Last timestamp handed out
    pub fn last_timestamp(&self) -> String {
        format!("t{}", self.ticks.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl TimeEffects for ManualTimeHandler {
    fn timestamp(&self) -> String {
        format!("t{}", self.ticks.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}
