//! Directory Outage Tests
//!
//! Commits and sweeps against a directory that fails on demand, with a manual
//! clock so the backoff schedule can be observed without waiting.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use cfstore::directory::PV_STATUS;
use cfstore::{
    CfStore, CfStoreConfig, CfStoreError, DirectoryError, ProducerId, RetryConfig, SweepOutcome,
};
use cfstore_testkit::{init_test_tracing, FlakyDirectory, ManualTimeHandler, TransactionBuilder};

fn secs(values: &[f64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs_f64(*s)).collect()
}

fn store_with(
    config: CfStoreConfig,
) -> (CfStore, Arc<FlakyDirectory>, Arc<ManualTimeHandler>) {
    init_test_tracing();
    let directory = Arc::new(FlakyDirectory::new());
    let time = Arc::new(ManualTimeHandler::new());
    let store = CfStore::new(config, directory.clone(), time.clone()).unwrap();
    (store, directory, time)
}

// ============================================================================
// Commit Retries
// ============================================================================

#[tokio::test]
async fn commit_waits_out_transient_outage() {
    let (store, directory, time) = store_with(CfStoreConfig::default());
    store.start().await.unwrap();

    directory.fail_next(3);
    let outcome = store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 4);
    assert_eq!(time.sleeps(), secs(&[1.0, 1.5, 2.25]));
    assert_eq!(directory.failures(), 3);
    let x = directory.inner().channel("X").unwrap();
    assert_eq!(x.property_value(PV_STATUS), Some("Active"));
}

#[tokio::test]
async fn backoff_is_capped() {
    let config = CfStoreConfig {
        retry: RetryConfig {
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 3000,
            shutdown_abandon_threshold_ms: 3000,
            max_commit_attempts: None,
        },
        ..CfStoreConfig::default()
    };
    let (store, directory, time) = store_with(config);
    store.start().await.unwrap();

    directory.fail_next(5);
    store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap();

    assert_eq!(time.sleeps(), secs(&[1.0, 2.0, 3.0, 3.0, 3.0]));
}

#[tokio::test]
async fn retry_ceiling_reports_exhaustion_but_keeps_local_state() {
    let config = CfStoreConfig {
        retry: RetryConfig {
            max_commit_attempts: Some(3),
            ..RetryConfig::default()
        },
        ..CfStoreConfig::default()
    };
    let (store, directory, time) = store_with(config);
    store.start().await.unwrap();

    directory.go_down();
    let err = store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap_err();

    assert_matches!(err, CfStoreError::RetryExhausted { attempts: 3, .. });
    assert_eq!(time.sleeps().len(), 2);
    let snapshot = store.registry_snapshot().await.unwrap();
    assert!(snapshot.channels.contains_key("X"));

    // The next commit from the producer writes the record once the directory is back.
    directory.come_up();
    store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").claim(1, "X").build())
        .await
        .unwrap();
    assert!(directory.inner().channel("X").is_some());
}

#[tokio::test]
async fn rejected_schema_bootstrap_is_not_retried() {
    let (store, directory, time) = store_with(CfStoreConfig::default());
    store.start().await.unwrap();

    directory.reject_property_creation(true);
    let err = store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap_err();

    assert_matches!(
        err,
        CfStoreError::SchemaBootstrap { ref property, source: DirectoryError::Rejected(_) }
            if property == "hostName"
    );
    assert!(time.sleeps().is_empty());
    assert!(directory.inner().channel("X").is_none());
}

#[tokio::test]
async fn commits_queue_behind_an_outage_in_order() {
    let (store, directory, time) = store_with(CfStoreConfig::default());
    store.start().await.unwrap();

    directory.fail_next(2);
    let first = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .commit(
                    TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build(),
                )
                .await
        })
    };

    // The worker is inside the first commit's retry loop before the second is sent.
    for _ in 0..1000 {
        if directory.failures() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(directory.failures() > 0);

    let second = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .commit(
                    TransactionBuilder::new("h2", 2).ioc_name("ioc2").initial().claim(1, "X").build(),
                )
                .await
        })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.producer_id, ProducerId::new("h1:1"));
    assert_eq!(first.attempts, 3);
    assert_eq!(second.attempts, 1);
    assert_eq!(time.sleeps(), secs(&[1.0, 1.5]));

    let snapshot = store.registry_snapshot().await.unwrap();
    assert_eq!(snapshot.owner_of("X"), Some(&ProducerId::new("h2:2")));
    assert_eq!(
        snapshot.channels["X"],
        vec![ProducerId::new("h1:1"), ProducerId::new("h2:2")]
    );
    let x = directory.inner().channel("X").unwrap();
    assert_eq!(x.property_value("hostName"), Some("h2"));
    assert_eq!(x.property_value("iocName"), Some("ioc2"));
}

#[tokio::test]
async fn oversized_backoff_multiplier_keeps_worker_alive() {
    let config = CfStoreConfig::from_toml_str("[retry]\nbackoff_multiplier = 1e300").unwrap();
    let (store, directory, time) = store_with(config);
    store.start().await.unwrap();

    directory.fail_next(3);
    let outcome = store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 4);
    assert_eq!(time.sleeps(), secs(&[1.0, 60.0, 60.0]));
    assert!(store.registry_snapshot().await.is_ok());
}

// ============================================================================
// Sweeps
// ============================================================================

#[tokio::test]
async fn startup_sweep_never_gives_up() {
    let (store, directory, time) = store_with(CfStoreConfig::default());

    directory.fail_next(10);
    let outcome = store.start().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Clean { deactivated: 0 });
    assert_eq!(time.sleeps().len(), 10);
    assert!(time.sleeps().iter().any(|d| *d >= Duration::from_secs(5)));
    assert!(store.is_running());
}

#[tokio::test]
async fn shutdown_sweep_abandons_unreachable_directory() {
    let (store, directory, time) = store_with(CfStoreConfig::default());
    store.start().await.unwrap();
    store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap();

    directory.go_down();
    let outcome = store.stop().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Abandoned { attempts: 4 });
    assert_eq!(time.sleeps(), secs(&[1.0, 1.5, 2.25, 3.375]));
    assert!(!store.is_running());
    // The record stays as the last successful write left it.
    let x = directory.inner().channel("X").unwrap();
    assert_eq!(x.property_value(PV_STATUS), Some("Active"));
}

#[tokio::test]
async fn shutdown_sweep_recovers_from_brief_outage() {
    let (store, directory, time) = store_with(CfStoreConfig::default());
    store.start().await.unwrap();
    store
        .commit(TransactionBuilder::new("h1", 1).ioc_name("ioc1").initial().claim(1, "X").build())
        .await
        .unwrap();

    directory.fail_next(2);
    let outcome = store.stop().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Clean { deactivated: 1 });
    assert_eq!(time.sleeps(), secs(&[1.0, 1.5]));
    let x = directory.inner().channel("X").unwrap();
    assert_eq!(x.property_value(PV_STATUS), Some("Inactive"));
}
