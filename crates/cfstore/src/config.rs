//! Engine configuration
//!
//! Loaded from TOML. Every field has a default so an empty file is a valid
//! configuration:
//!
//! ```toml
//! username = "cfstore"
//! debug_file_loc = "/var/lib/recceiver/channels.json"
//! queue_depth = 64
//!
//! [retry]
//! initial_backoff_ms = 1000
//! backoff_multiplier = 1.5
//! max_backoff_ms = 60000
//! shutdown_abandon_threshold_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CfStoreError, CfStoreResult};

/// Default owner used when a transaction carries no override.
pub const DEFAULT_OWNER: &str = "cfstore";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfStoreConfig {
    /// Default owner for directory writes and lifecycle sweeps
    pub username: String,

    /// Where to write the debug snapshot; disabled when unset
    pub debug_file_loc: Option<PathBuf>,

    /// Capacity of the commit queue before callers are back-pressured
    pub queue_depth: usize,

    /// Backoff schedule for directory retries
    pub retry: RetryConfig,
}

impl Default for CfStoreConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_OWNER.to_string(),
            debug_file_loc: None,
            queue_depth: 64,
            retry: RetryConfig::default(),
        }
    }
}

impl CfStoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> CfStoreResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CfStoreError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> CfStoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CfStoreError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CfStoreResult<()> {
        if self.username.trim().is_empty() {
            return Err(CfStoreError::config("username must not be empty"));
        }
        if self.queue_depth == 0 {
            return Err(CfStoreError::config("queue_depth must be at least 1"));
        }
        self.retry.validate()
    }
}

/// Exponential backoff settings shared by commits and lifecycle sweeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First sleep after a transient failure
    pub initial_backoff_ms: u64,

    /// Growth factor applied after every sleep
    pub backoff_multiplier: f64,

    /// Ceiling for a single sleep
    pub max_backoff_ms: u64,

    /// Once stopped, a sweep whose backoff has grown to this value is abandoned
    pub shutdown_abandon_threshold_ms: u64,

    /// Optional ceiling on reconciliation attempts per commit.
    ///
    /// `None` retries for as long as the process lives, which stalls the commit
    /// queue during a directory outage.
    pub max_commit_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            backoff_multiplier: 1.5,
            max_backoff_ms: 60_000,
            shutdown_abandon_threshold_ms: 5_000,
            max_commit_attempts: None,
        }
    }
}

impl RetryConfig {
    /// Initial backoff as a duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff ceiling as a duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Shutdown abandon threshold as a duration
    pub fn shutdown_abandon_threshold(&self) -> Duration {
        Duration::from_millis(self.shutdown_abandon_threshold_ms)
    }

    /// Validate the backoff schedule
    pub fn validate(&self) -> CfStoreResult<()> {
        if self.initial_backoff_ms == 0 {
            return Err(CfStoreError::config("initial_backoff_ms must be positive"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(CfStoreError::config(
                "backoff_multiplier must be a finite value of at least 1.0",
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(CfStoreError::config(
                "max_backoff_ms must not be below initial_backoff_ms",
            ));
        }
        if self.shutdown_abandon_threshold_ms > self.max_backoff_ms {
            return Err(CfStoreError::config(
                "shutdown_abandon_threshold_ms must not exceed max_backoff_ms",
            ));
        }
        if self.max_commit_attempts == Some(0) {
            return Err(CfStoreError::config("max_commit_attempts must be at least 1"));
        }
        Ok(())
    }
}
