//! Startup and shutdown sweeps
//!
//! Local state is empty after a restart, so any channel the directory still
//! lists as `Active` is stale. The sweep marks all of them `Inactive`; commits
//! that follow re-activate whatever producers announce again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RetryConfig;
use crate::directory::{DirectoryEffects, Property, PvStatus, Query, PV_STATUS};
use crate::error::CfStoreResult;
use crate::retry::Backoff;
use crate::time::TimeEffects;

/// Result of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The directory holds no active channels any more
    Clean {
        /// Number of channels marked inactive
        deactivated: usize,
    },
    /// The engine is stopping and the directory stayed unreachable
    Abandoned {
        /// Attempts made before giving up
        attempts: u32,
    },
}

/// Runs the stale-entry sweep against the directory
#[derive(Clone)]
pub struct LifecycleController {
    directory: Arc<dyn DirectoryEffects>,
    owner: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("owner", &self.owner)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    /// Create a controller writing as `owner`
    pub fn new(directory: Arc<dyn DirectoryEffects>, owner: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            directory,
            owner: owner.into(),
            retry,
        }
    }

    /// One attempt: mark every active channel inactive
    pub async fn deactivate_active(&self) -> CfStoreResult<usize> {
        let active = self
            .directory
            .find_by_attributes(&[Query::property(PV_STATUS, PvStatus::Active.as_str())])
            .await?;
        let names: Vec<String> = active.into_iter().map(|ch| ch.name).collect();
        if !names.is_empty() {
            self.directory
                .update_property(
                    Property::with_value(PV_STATUS, &self.owner, PvStatus::Inactive.as_str()),
                    &names,
                )
                .await?;
        }
        Ok(names.len())
    }

    /// Sweep until clean.
    ///
    /// Transient failures are retried with backoff. While `running` is set the
    /// sweep never gives up; once cleared, it is abandoned as soon as the
    /// backoff has grown to the shutdown threshold.
    pub async fn sweep(
        &self,
        running: &AtomicBool,
        time: &dyn TimeEffects,
    ) -> CfStoreResult<SweepOutcome> {
        let mut backoff = Backoff::new(&self.retry);
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            tracing::debug!(attempt = attempts, "cleaning directory");
            match self.deactivate_active().await {
                Ok(deactivated) => {
                    tracing::info!(deactivated, "directory clean");
                    return Ok(SweepOutcome::Clean { deactivated });
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt = attempts, error = %e, "cleaning failed, retrying");
                }
                Err(e) => return Err(e),
            }

            time.sleep(backoff.next_sleep()).await;
            if !running.load(Ordering::SeqCst)
                && backoff.current() >= self.retry.shutdown_abandon_threshold()
            {
                tracing::warn!(attempts, "abandoning directory clean");
                return Ok(SweepOutcome::Abandoned { attempts });
            }
        }
    }
}
