//! Time effects: change timestamps and backoff sleeps
//!
//! The engine never reads the clock or sleeps directly; it goes through
//! [`TimeEffects`] so tests can substitute a manual clock.

use std::time::Duration;

use async_trait::async_trait;

/// Clock and sleep operations used by the engine
#[async_trait]
pub trait TimeEffects: Send + Sync {
    /// Timestamp recorded in the `time` property of changed channels
    fn timestamp(&self) -> String;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock handler for production use
///
/// Timestamps are local time with microsecond precision, e.g.
/// `2024-03-01 14:02:11.532190`.
#[derive(Debug, Clone, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeEffects for RealTimeHandler {
    fn timestamp(&self) -> String {
        chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_microsecond_precision() {
        let ts = RealTimeHandler::new().timestamp();
        let (_, fraction) = ts.rsplit_once('.').unwrap();
        assert_eq!(fraction.len(), 6);
        assert_eq!(ts.len(), "2024-03-01 14:02:11.532190".len());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_advances_tokio_clock() {
        let start = tokio::time::Instant::now();
        RealTimeHandler::new().sleep(Duration::from_secs(3)).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
