//! cfstore testing infrastructure
//!
//! Fault-injecting directory, manual clock and transaction builders shared by
//! the cfstore integration tests.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cfstore::{CfStore, CfStoreConfig};
//! use cfstore_testkit::{FlakyDirectory, ManualTimeHandler, TransactionBuilder};
//!
//! # async fn example() {
//! let directory = Arc::new(FlakyDirectory::new());
//! let time = Arc::new(ManualTimeHandler::new());
//! let store = CfStore::new(CfStoreConfig::default(), directory.clone(), time.clone()).unwrap();
//! store.start().await.unwrap();
//!
//! directory.fail_next(3);
//! store
//!     .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
//!     .await
//!     .unwrap();
//! assert_eq!(time.sleeps().len(), 3);
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod builders;
pub mod directory;
pub mod time;

pub use builders::TransactionBuilder;
pub use directory::FlakyDirectory;
pub use time::ManualTimeHandler;

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
