//! # cfstore - Channel Ownership Reconciliation
//!
//! Producers (IOCs) announce which channels they serve in batches called
//! transactions. This crate keeps a local table of who claims what and pushes
//! every change into a remote channel directory, so that the directory ends up
//! describing reality even across restarts, producer races and directory
//! outages.
//!
//! ## Architecture
//!
//! - [`registry`]: channel ownership table and producer registry
//! - [`reconcile`]: turns one producer's changes into directory writes
//! - [`retry`]: exponential backoff for transient directory failures
//! - [`engine`]: [`CfStore`], the serialized commit queue that owns all state
//! - [`lifecycle`]: stale-entry sweeps on start and stop
//! - [`directory`]: the [`DirectoryEffects`] client trait and an in-memory directory
//! - [`time`]: the [`TimeEffects`] clock/sleep trait
//!
//! ## Design Principles
//!
//! - **Last claim wins**: when two producers claim a name, the newest owns it
//! - **Never delete**: abandoned channels are marked `Inactive`, not removed
//! - **Strict ordering**: commits and sweeps run one at a time, in arrival order
//! - **Retry, don't fail**: directory outages delay commits instead of failing them
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cfstore::{CfStore, CfStoreConfig, MemoryDirectory, RealTimeHandler};
//! use cfstore::transaction::{RecordAddition, SourceAddress, TransactionRecord};
//!
//! # async fn example() -> cfstore::CfStoreResult<()> {
//! let store = CfStore::new(
//!     CfStoreConfig::default(),
//!     Arc::new(MemoryDirectory::new()),
//!     Arc::new(RealTimeHandler::new()),
//! )?;
//! store.start().await?;
//!
//! let mut record = TransactionRecord::new(SourceAddress::new("ioc-host", 5064));
//! record.initial = true;
//! record.addrec.insert(1, RecordAddition { name: "SR:C01:BPM".into(), record_type: "ai".into() });
//! store.commit(record).await?;
//!
//! store.stop().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod snapshot;
pub mod time;
pub mod transaction;

pub use config::{CfStoreConfig, RetryConfig};
pub use directory::{Channel, DirectoryEffects, MemoryDirectory, Property, PvStatus, Query};
pub use engine::{CfStore, CommitOutcome};
pub use error::{CfStoreError, CfStoreResult, DirectoryError};
pub use lifecycle::SweepOutcome;
pub use reconcile::ReconcileReport;
pub use registry::{LocalRegistry, ProducerEntry, RegistrySnapshot};
pub use time::{RealTimeHandler, TimeEffects};
pub use transaction::{ProducerId, TransactionRecord};
