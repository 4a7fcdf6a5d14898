//! Retry with exponential backoff for transient directory failures
//!
//! Sleeps start at `initial_backoff`, grow by `backoff_multiplier` after every
//! sleep and never exceed `max_backoff`. With the defaults that is
//! 1s, 1.5s, 2.25s, ... capped at 60s.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{CfStoreError, CfStoreResult};
use crate::time::TimeEffects;

/// Backoff schedule state
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    /// Start a schedule at the configured initial backoff
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_backoff(),
            multiplier: config.backoff_multiplier,
            max: config.max_backoff(),
        }
    }

    /// Duration of the next sleep; advances the schedule
    pub fn next_sleep(&mut self) -> Duration {
        let sleep = self.next.min(self.max);
        // Growth past what a Duration can hold saturates at the ceiling.
        self.next = Duration::try_from_secs_f64(self.next.as_secs_f64() * self.multiplier)
            .map_or(self.max, |grown| grown.min(self.max));
        sleep
    }

    /// Backoff the schedule has grown to
    pub fn current(&self) -> Duration {
        self.next
    }
}

/// Run `attempt` until it succeeds or fails with a non-transient error.
///
/// Transient failures are logged and retried after a backoff sleep. Retries
/// are unbounded unless `config.max_commit_attempts` is set, in which case the
/// last failure is returned wrapped in [`CfStoreError::RetryExhausted`].
/// On success the number of attempts made is returned with the value.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    time: &dyn TimeEffects,
    operation: &str,
    mut attempt: F,
) -> CfStoreResult<(T, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CfStoreResult<T>>,
{
    let mut backoff = Backoff::new(config);
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        match attempt().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(operation, attempts, "directory operation recovered");
                }
                return Ok((value, attempts));
            }
            Err(e) if e.is_transient() => {
                if config.max_commit_attempts.is_some_and(|max| attempts >= max) {
                    tracing::error!(operation, attempts, error = %e, "giving up on directory operation");
                    return Err(CfStoreError::RetryExhausted {
                        attempts,
                        source: Box::new(e),
                    });
                }
                let sleep = backoff.next_sleep();
                tracing::warn!(
                    operation,
                    attempt = attempts,
                    backoff_ms = sleep.as_millis() as u64,
                    error = %e,
                    "directory operation failed, retrying"
                );
                time.sleep(sleep).await;
            }
            Err(e) => return Err(e),
        }
    }
}
