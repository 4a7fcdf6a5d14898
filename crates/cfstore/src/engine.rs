//! Commit engine
//!
//! [`CfStore`] is a cheap, cloneable handle. Every operation becomes a command
//! on a bounded queue served by a single worker task, which exclusively owns
//! the [`LocalRegistry`]. Commands therefore run one at a time in arrival
//! order: a commit is applied locally, reconciled with the directory (retrying
//! through outages) and answered before the next command is looked at.
//! Lifecycle sweeps travel through the same queue, so the directory never sees
//! two conversations from this engine at once.
//!
//! ## Lock Usage
//!
//! `parking_lot::Mutex` guards the queue sender and the worker handle. Both are
//! only taken briefly to clone or take the value and are never held across an
//! `.await`. `start` also holds the sender lock while it sets `running` and
//! queues its sweep, so no commit can be queued ahead of the startup sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::CfStoreConfig;
use crate::directory::DirectoryEffects;
use crate::error::{CfStoreError, CfStoreResult};
use crate::lifecycle::{LifecycleController, SweepOutcome};
use crate::reconcile::{ReconcileReport, ReconcileRequest, Reconciler};
use crate::registry::{LocalRegistry, RegistrySnapshot};
use crate::retry::retry_transient;
use crate::snapshot::DebugSnapshotWriter;
use crate::time::TimeEffects;
use crate::transaction::{ProducerId, TransactionRecord};

/// Summary of a completed commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Producer that sent the transaction
    pub producer_id: ProducerId,
    /// Distinct names claimed
    pub claimed: usize,
    /// Names withdrawn
    pub withdrawn: usize,
    /// What was written to the directory
    pub report: ReconcileReport,
    /// Reconciliation attempts, including the successful one
    pub attempts: u32,
}

enum Command {
    Commit {
        record: Box<TransactionRecord>,
        reply: oneshot::Sender<CfStoreResult<CommitOutcome>>,
    },
    Sweep {
        reply: oneshot::Sender<CfStoreResult<SweepOutcome>>,
    },
    Inspect {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
}

struct Shared {
    config: CfStoreConfig,
    running: Arc<AtomicBool>,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the commit engine
#[derive(Clone)]
pub struct CfStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CfStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfStore")
            .field("running", &self.is_running())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl CfStore {
    /// Validate `config` and spawn the commit worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: CfStoreConfig,
        directory: Arc<dyn DirectoryEffects>,
        time: Arc<dyn TimeEffects>,
    ) -> CfStoreResult<Self> {
        config.validate()?;
        tracing::info!(name = %config.username, "initializing cfstore");

        let running = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let worker = CommitWorker {
            registry: LocalRegistry::new(),
            reconciler: Reconciler::new(directory.clone()),
            lifecycle: LifecycleController::new(
                directory,
                config.username.clone(),
                config.retry.clone(),
            ),
            snapshot: config.debug_file_loc.clone().map(DebugSnapshotWriter::new),
            time,
            config: config.clone(),
            running: running.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                running,
                commands: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Whether the engine accepts commits
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Configuration in use
    pub fn config(&self) -> &CfStoreConfig {
        &self.shared.config
    }

    fn sender(&self) -> CfStoreResult<mpsc::Sender<Command>> {
        self.shared
            .commands
            .lock()
            .clone()
            .ok_or(CfStoreError::EngineClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> CfStoreResult<T> {
        let sender = self.sender()?;
        let (reply, response) = oneshot::channel();
        sender
            .send(make(reply))
            .await
            .map_err(|_| CfStoreError::EngineClosed)?;
        response.await.map_err(|_| CfStoreError::EngineClosed)
    }

    /// Start accepting commits after clearing stale `Active` entries.
    ///
    /// The sweep retries through directory outages for as long as it takes.
    pub async fn start(&self) -> CfStoreResult<SweepOutcome> {
        tracing::info!("starting cfstore");
        let sender = self.sender()?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| CfStoreError::EngineClosed)?;
        let (reply, response) = oneshot::channel();
        {
            // Commits see `running` only once the sweep is ahead of them in the queue.
            let commands = self.shared.commands.lock();
            if commands.is_none() {
                return Err(CfStoreError::EngineClosed);
            }
            self.shared.running.store(true, Ordering::SeqCst);
            permit.send(Command::Sweep { reply });
        }
        response.await.map_err(|_| CfStoreError::EngineClosed)?
    }

    /// Apply one transaction and reconcile it with the directory.
    ///
    /// Resolves once the directory reflects the transaction. During a
    /// directory outage this waits for recovery unless a retry ceiling is
    /// configured.
    pub async fn commit(&self, record: TransactionRecord) -> CfStoreResult<CommitOutcome> {
        if !self.is_running() {
            return Err(CfStoreError::NotRunning);
        }
        self.request(|reply| Command::Commit {
            record: Box::new(record),
            reply,
        })
        .await?
    }

    /// Copy of the local ownership state, taken between commits
    pub async fn registry_snapshot(&self) -> CfStoreResult<RegistrySnapshot> {
        self.request(|reply| Command::Inspect { reply }).await
    }

    /// Stop accepting commits, sweep the directory once more and shut the worker down.
    ///
    /// The sweep gives up after a short backoff if the directory is unreachable;
    /// the worker is shut down whatever its outcome.
    pub async fn stop(&self) -> CfStoreResult<SweepOutcome> {
        self.shared.running.store(false, Ordering::SeqCst);
        let outcome = self.request(|reply| Command::Sweep { reply }).await;

        drop(self.shared.commands.lock().take());
        let worker = self.shared.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "commit worker terminated abnormally");
            }
        }
        tracing::info!(outcome = ?outcome, "cfstore stopped");
        outcome?
    }
}

/// Owns all mutable engine state; runs on its own task
struct CommitWorker {
    registry: LocalRegistry,
    reconciler: Reconciler,
    lifecycle: LifecycleController,
    snapshot: Option<DebugSnapshotWriter>,
    time: Arc<dyn TimeEffects>,
    config: CfStoreConfig,
    running: Arc<AtomicBool>,
}

impl CommitWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Commit { record, reply } => {
                    let result = self.commit(&record).await;
                    if let Err(e) = &result {
                        tracing::error!(producer = %record.producer_id(), error = %e, "commit failed");
                    }
                    let _ = reply.send(result);
                }
                Command::Sweep { reply } => {
                    let result = self
                        .lifecycle
                        .sweep(&self.running, self.time.as_ref())
                        .await;
                    let _ = reply.send(result);
                }
                Command::Inspect { reply } => {
                    let _ = reply.send(self.registry.snapshot());
                }
            }
        }
        tracing::debug!("commit queue closed");
    }

    async fn commit(&mut self, record: &TransactionRecord) -> CfStoreResult<CommitOutcome> {
        let identity = record.identity(&self.config.username)?;
        tracing::debug!(
            producer = %identity.id,
            initial = record.initial,
            connected = record.connected,
            additions = record.addrec.len(),
            deletions = record.delrec.len(),
            "committing transaction"
        );

        let changes = self.registry.apply(record, &identity);
        let time = self.time.timestamp();
        let request = ReconcileRequest {
            host_name: Some(&identity.host_name),
            ioc_name: Some(&identity.ioc_name),
            new_names: &changes.new_names,
            removed_names: &changes.removed_names,
            owner: &identity.owner,
            time: &time,
        };

        let request = &request;
        let reconciler = &self.reconciler;
        let registry = &self.registry;
        let result = retry_transient(&self.config.retry, self.time.as_ref(), "reconcile", move || {
            reconciler.reconcile(request, registry)
        })
        .await;

        if let Some(writer) = &self.snapshot {
            writer.write(&self.registry).await;
        }

        let (report, attempts) = result?;
        tracing::info!(
            producer = %identity.id,
            created = report.created,
            updated = report.updated,
            orphaned = report.orphaned,
            attempts,
            "transaction committed"
        );
        Ok(CommitOutcome {
            producer_id: identity.id,
            claimed: changes.new_names.len(),
            withdrawn: changes.removed_names.len(),
            report,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, PV_STATUS};
    use crate::time::RealTimeHandler;
    use crate::transaction::{RecordAddition, SourceAddress, INFO_IOCNAME};

    fn store(directory: Arc<MemoryDirectory>) -> CfStore {
        CfStore::new(
            CfStoreConfig::default(),
            directory,
            Arc::new(RealTimeHandler::new()),
        )
        .unwrap()
    }

    fn claim(host: &str, port: u16, ioc: &str, names: &[&str]) -> TransactionRecord {
        let mut record = TransactionRecord::new(SourceAddress::new(host, port));
        record.initial = true;
        record.infos.insert(INFO_IOCNAME.to_string(), ioc.to_string());
        for (rid, name) in names.iter().enumerate() {
            record.addrec.insert(
                rid as u64,
                RecordAddition {
                    name: name.to_string(),
                    record_type: "ai".to_string(),
                },
            );
        }
        record
    }

    #[tokio::test]
    async fn commit_before_start_is_rejected() {
        let store = store(Arc::new(MemoryDirectory::new()));
        let err = store.commit(claim("h1", 1, "ioc1", &["X"])).await.unwrap_err();
        assert_eq!(err, CfStoreError::NotRunning);
    }

    #[tokio::test]
    async fn commit_after_stop_is_rejected() {
        let store = store(Arc::new(MemoryDirectory::new()));
        store.start().await.unwrap();
        store.stop().await.unwrap();

        assert!(!store.is_running());
        assert_eq!(
            store.commit(claim("h1", 1, "ioc1", &["X"])).await.unwrap_err(),
            CfStoreError::NotRunning
        );
        assert_eq!(
            store.registry_snapshot().await.unwrap_err(),
            CfStoreError::EngineClosed
        );
    }

    #[tokio::test]
    async fn start_after_stop_leaves_engine_stopped() {
        let store = store(Arc::new(MemoryDirectory::new()));
        store.start().await.unwrap();
        store.stop().await.unwrap();

        assert_eq!(store.start().await.unwrap_err(), CfStoreError::EngineClosed);
        assert!(!store.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn startup_sweep_runs_before_racing_commits() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.set_property(crate::directory::Property::definition(PV_STATUS, "cfstore"))
            .await
            .unwrap();
        let mut stale = crate::directory::Channel::new("X", "cfstore");
        stale.set_property(crate::directory::Property::with_value(PV_STATUS, "cfstore", "Active"));
        dir.insert_channel(stale);
        let store = store(dir.clone());

        let racer = {
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    match store.commit(claim("h1", 1, "ioc1", &["X"])).await {
                        Err(CfStoreError::NotRunning) => tokio::task::yield_now().await,
                        other => return other,
                    }
                }
            })
        };
        let outcome = store.start().await.unwrap();
        racer.await.unwrap().unwrap();

        // The sweep saw the stale record, and the commit that followed re-activated it.
        assert_eq!(outcome, SweepOutcome::Clean { deactivated: 1 });
        assert_eq!(dir.channel("X").unwrap().property_value(PV_STATUS), Some("Active"));
    }

    #[tokio::test]
    async fn commit_updates_registry_and_directory() {
        let dir = Arc::new(MemoryDirectory::new());
        let store = store(dir.clone());
        store.start().await.unwrap();

        let outcome = store.commit(claim("h1", 1, "ioc1", &["X", "Y"])).await.unwrap();

        assert_eq!(outcome.producer_id.as_str(), "h1:1");
        assert_eq!(outcome.claimed, 2);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.report.created, 2);

        let snapshot = store.registry_snapshot().await.unwrap();
        assert_eq!(snapshot.producers[&outcome.producer_id].channel_count, 2);
        assert_eq!(dir.channel("Y").unwrap().property_value(PV_STATUS), Some("Active"));
    }

    #[tokio::test]
    async fn malformed_commit_leaves_registry_untouched() {
        let store = store(Arc::new(MemoryDirectory::new()));
        store.start().await.unwrap();

        let err = store.commit(claim("", 1, "ioc1", &["X"])).await.unwrap_err();

        assert!(matches!(err, CfStoreError::MalformedTransaction(_)));
        assert_eq!(store.registry_snapshot().await.unwrap(), RegistrySnapshot::default());
    }

    #[tokio::test]
    async fn stop_sweeps_active_channels() {
        let dir = Arc::new(MemoryDirectory::new());
        let store = store(dir.clone());
        store.start().await.unwrap();
        store.commit(claim("h1", 1, "ioc1", &["X"])).await.unwrap();

        let outcome = store.stop().await.unwrap();

        assert_eq!(outcome, SweepOutcome::Clean { deactivated: 1 });
        assert_eq!(dir.channel("X").unwrap().property_value(PV_STATUS), Some("Inactive"));
    }
}
