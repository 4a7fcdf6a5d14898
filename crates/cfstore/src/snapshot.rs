//! Debug snapshot of local ownership
//!
//! Writes `[[channel, hostName, iocName], ...]` for the current owner of every
//! channel, sorted by channel name. The file is rewritten after every commit.
//! Failures are logged and otherwise ignored.

use std::io;
use std::path::{Path, PathBuf};

use crate::registry::LocalRegistry;

/// `(channel, hostName, iocName)` of each channel's current owner, sorted by channel.
pub fn snapshot_entries(registry: &LocalRegistry) -> Vec<(String, String, String)> {
    // iter_channels is ordered by name
    registry
        .iter_channels()
        .filter_map(|(name, _)| match registry.current_claimant(name) {
            Some((_, entry)) => Some((
                name.to_string(),
                entry.host_name.clone(),
                entry.ioc_name.clone(),
            )),
            None => {
                tracing::warn!(channel = name, "owner of channel has no registry entry");
                None
            }
        })
        .collect()
}

/// Writes the snapshot file
#[derive(Debug, Clone)]
pub struct DebugSnapshotWriter {
    path: PathBuf,
}

impl DebugSnapshotWriter {
    /// Writer targeting `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with the current state of `registry`
    pub async fn try_write(&self, registry: &LocalRegistry) -> io::Result<()> {
        let json = serde_json::to_vec(&snapshot_entries(registry))?;
        tokio::fs::write(&self.path, json).await
    }

    /// Like [`try_write`](Self::try_write), logging instead of returning failures
    pub async fn write(&self, registry: &LocalRegistry) {
        if let Err(e) = self.try_write(registry).await {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write debug snapshot");
        }
    }
}
