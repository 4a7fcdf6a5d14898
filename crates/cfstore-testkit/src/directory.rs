//! Fault-injecting directory

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cfstore::{Channel, DirectoryEffects, DirectoryError, MemoryDirectory, Property, Query};

/// [`MemoryDirectory`] wrapper that can be made to fail on demand.
///
/// Failures are [`DirectoryError::Unavailable`] unless noted otherwise, and a
/// failing call has no effect on the wrapped directory.
#[derive(Debug, Default)]
pub struct FlakyDirectory {
    inner: Arc<MemoryDirectory>,
    fail_next: AtomicUsize,
    down: AtomicBool,
    reject_property_creation: AtomicBool,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakyDirectory {
    /// Wrap a fresh, empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing directory
    pub fn wrapping(inner: Arc<MemoryDirectory>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// The wrapped directory
    pub fn inner(&self) -> &MemoryDirectory {
        &self.inner
    }

    /// Fail the next `n` calls
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until [`come_up`](Self::come_up)
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Stop failing
    pub fn come_up(&self) {
        self.down.store(false, Ordering::SeqCst);
        self.fail_next.store(0, Ordering::SeqCst);
    }

    /// Refuse property definitions with [`DirectoryError::Rejected`]
    pub fn reject_property_creation(&self, reject: bool) {
        self.reject_property_creation.store(reject, Ordering::SeqCst);
    }

    /// Calls received, failed or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that were failed on purpose
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> Result<(), DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scheduled = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled || self.down.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(operation, "injecting directory failure");
            return Err(DirectoryError::unavailable(format!("{operation}: injected outage")));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryEffects for FlakyDirectory {
    async fn find_by_attributes(&self, query: &[Query]) -> Result<Vec<Channel>, DirectoryError> {
        self.check("find_by_attributes")?;
        self.inner.find_by_attributes(query).await
    }

    async fn find_property(&self, name: &str) -> Result<Option<Property>, DirectoryError> {
        self.check("find_property")?;
        self.inner.find_property(name).await
    }

    async fn set_property(&self, property: Property) -> Result<(), DirectoryError> {
        self.check("set_property")?;
        if self.reject_property_creation.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(DirectoryError::rejected(format!(
                "not allowed to create {}",
                property.name
            )));
        }
        self.inner.set_property(property).await
    }

    async fn set_channels(&self, channels: Vec<Channel>) -> Result<(), DirectoryError> {
        self.check("set_channels")?;
        self.inner.set_channels(channels).await
    }

    async fn update_property(
        &self,
        property: Property,
        channel_names: &[String],
    ) -> Result<(), DirectoryError> {
        self.check("update_property")?;
        self.inner.update_property(property, channel_names).await
    }
}
