//! `Scheduler`: the supervisor loop that drives `SyncEngine` invocations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::metadata::record::{ProjectKey, ProjectRecord, RepoType, TriggeredBy};
use crate::metadata::store::MetadataStore;
use crate::pipeline::CancellationToken;
use crate::sync_engine::{SyncEngine, SyncResult};

/// A source of projects to auto-register at startup. Consulted once, when
/// `auto_register` is enabled, and never again — ongoing discovery of new
/// projects is out of scope (projects are added explicitly thereafter via
/// the registry).
#[async_trait]
pub trait ProjectDiscovery: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<DiscoveredProject>>;
}

#[derive(Debug, Clone)]
pub struct DiscoveredProject {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub repo_type: RepoType,
}

struct TriggerRequest {
    key: ProjectKey,
    reply: broadcast::Sender<SyncResult>,
}

/// Drives `SyncEngine` against the metadata store until `stop()` is called.
/// Per-project executions are dispatched to their own `tokio::task`, bounded
/// by a semaphore sized to `max_concurrent`. Manual triggers for a key
/// already in flight are coalesced onto that run rather than started again.
pub struct Scheduler {
    store: Arc<MetadataStore>,
    engine: Arc<SyncEngine>,
    check_interval: std::time::Duration,
    max_retries: u32,
    retry_base_delay: chrono::Duration,
    default_sync_interval: chrono::Duration,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<ProjectKey, broadcast::Sender<SyncResult>>>>,
    trigger_tx: mpsc::UnboundedSender<TriggerRequest>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<TriggerRequest>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<MetadataStore>,
        engine: Arc<SyncEngine>,
        check_interval: std::time::Duration,
        max_retries: u32,
        retry_base_delay: chrono::Duration,
        default_sync_interval: chrono::Duration,
        max_concurrent: usize,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            store,
            engine,
            check_interval,
            max_retries,
            retry_base_delay,
            default_sync_interval,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown_tx,
            shutdown_rx,
            loop_handle: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Idempotent. If `auto_register` and a discovery source are supplied,
    /// scans it once and registers any unknown projects with defaults,
    /// then begins the supervisor loop.
    pub async fn start(
        self: &Arc<Self>,
        auto_register: bool,
        discovery: Option<Arc<dyn ProjectDiscovery>>,
    ) {
        {
            let handle = self.loop_handle.lock().await;
            if handle.is_some() {
                warn!("scheduler is already running");
                return;
            }
        }

        if let Err(e) = self.store.recover_in_progress().await {
            error!(error = %e, "failed to recover in_progress records at startup");
        }

        if auto_register {
            if let Some(discovery) = discovery {
                self.auto_register(discovery.as_ref()).await;
            }
        }

        let Some(mut trigger_rx) = self.trigger_rx.lock().await.take() else {
            warn!("scheduler trigger channel already consumed");
            return;
        };

        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            info!("sync scheduler started");
            loop {
                while let Ok(request) = trigger_rx.try_recv() {
                    this.dispatch_manual(request);
                }

                let now = Utc::now();
                let due = this
                    .store
                    .select_due(now, this.max_retries, this.retry_base_delay)
                    .await;

                for record in due {
                    this.dispatch_scheduled(record).await;
                }

                tokio::select! {
                    _ = tokio::time::sleep(this.check_interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }

                if *shutdown_rx.borrow() {
                    break;
                }
            }
            info!("sync scheduler stopped");
        });

        *self.loop_handle.lock().await = Some(handle);
    }

    /// Whether the supervisor loop is currently running — `true` between a
    /// successful `start()` and the matching `stop()`.
    pub async fn running(&self) -> bool {
        self.loop_handle.lock().await.is_some()
    }

    /// Signal the loop to exit. In-flight executions are allowed to finish
    /// or are cooperatively cancelled; either is safe since metadata writes
    /// happen only at terminal transitions.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.cancel.cancel();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Enqueue a manual sync request and return its result. Concurrent
    /// triggers for the same key are coalesced onto the in-flight run.
    pub async fn trigger(&self, key: ProjectKey) -> SyncResult {
        if let Some(result) = self.join_in_flight(&key).await {
            return result;
        }

        let (reply_tx, mut reply_rx) = broadcast::channel(1);
        if self
            .trigger_tx
            .send(TriggerRequest {
                key,
                reply: reply_tx,
            })
            .is_err()
        {
            return failed_result("scheduler is not running");
        }

        match reply_rx.recv().await {
            Ok(result) => result,
            Err(_) => failed_result("scheduler closed before sync completed"),
        }
    }

    async fn join_in_flight(&self, key: &ProjectKey) -> Option<SyncResult> {
        let sender = {
            let in_flight = self.in_flight.lock().await;
            in_flight.get(key).cloned()
        }?;
        let mut receiver = sender.subscribe();
        receiver.recv().await.ok()
    }

    fn dispatch_manual(self: &Arc<Self>, request: TriggerRequest) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Some(record) = this.store.get(&request.key).await else {
                let _ = request
                    .reply
                    .send(failed_result(&format!("project not found: {}", request.key)));
                return;
            };
            this.run_tracked(record, true, TriggeredBy::Manual, Some(request.reply))
                .await;
        });
    }

    async fn dispatch_scheduled(self: &Arc<Self>, record: ProjectRecord) {
        let this = Arc::clone(self);
        let permit = Arc::clone(&this.semaphore);
        tokio::spawn(async move {
            let _permit = match permit.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            this.run_tracked(record, false, TriggeredBy::Scheduler, None)
                .await;
        });
    }

    /// Runs the engine for `record`, registering it in `in_flight` so a
    /// second dispatch for the same key — scheduled or manual — coalesces
    /// onto this run instead of starting a concurrent `engine.run`. This is
    /// the only place that enforces the per-key exclusivity guarantee.
    async fn run_tracked(
        &self,
        record: ProjectRecord,
        force: bool,
        triggered_by: TriggeredBy,
        reply: Option<broadcast::Sender<SyncResult>>,
    ) {
        let key = record.key();

        let claim = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&key) {
                Err(existing.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                in_flight.insert(key.clone(), tx.clone());
                Ok(tx)
            }
        };

        let sender = match claim {
            Ok(tx) => tx,
            Err(mut receiver) => {
                // Another execution for this key is already in flight;
                // join its result rather than calling `engine.run` again.
                let result = receiver.recv().await.unwrap_or_else(|_| {
                    failed_result("in-flight sync for this project ended without a result")
                });
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                return;
            }
        };

        let result = self
            .engine
            .run(record, force, triggered_by, &self.cancel)
            .await;

        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(&key);
        }

        let _ = sender.send(result.clone());
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    async fn auto_register(&self, discovery: &dyn ProjectDiscovery) {
        let discovered = match discovery.list().await {
            Ok(projects) => projects,
            Err(e) => {
                warn!(error = %e, "project discovery failed, skipping auto-register");
                return;
            }
        };

        let mut registered = 0;
        for project in discovered {
            let key = ProjectKey::new(project.repo_type, &project.owner, &project.repo);
            if self.store.get(&key).await.is_some() {
                continue;
            }

            let record = ProjectRecord::new(
                &key,
                project.repo_url,
                self.default_sync_interval.num_minutes().max(1),
                None,
                true,
                Utc::now(),
            );

            if let Err(e) = self.store.save(record).await {
                warn!(error = %e, project = %key, "failed to auto-register discovered project");
                continue;
            }
            registered += 1;
        }

        if registered > 0 {
            debug!(count = registered, "auto-registered discovered projects");
        }
    }
}

fn failed_result(reason: &str) -> SyncResult {
    SyncResult {
        success: false,
        skipped: None,
        reason: None,
        document_count: None,
        embedding_count: None,
        commit_hash: None,
        duration_seconds: 0.0,
        error: Some(reason.to_string()),
        retry_count: None,
        max_retries: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{GitError, GitProvider};
    use crate::metadata::record::SyncStatus;
    use crate::pipeline::{IndexPipeline, PipelineOutput, PipelineError};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct AlwaysUpdatedGit;

    #[async_trait]
    impl GitProvider for AlwaysUpdatedGit {
        async fn clone_repo(
            &self,
            _url: &str,
            path: &Path,
            _repo_type: RepoType,
            _token: Option<&str>,
        ) -> Result<(), GitError> {
            std::fs::create_dir_all(path.join(".git")).unwrap();
            Ok(())
        }
        async fn fetch_and_remote_head(&self, _path: &Path) -> Result<Option<String>, GitError> {
            Ok(Some("newhash".to_string()))
        }
        async fn local_head(&self, _path: &Path) -> Result<Option<String>, GitError> {
            Ok(Some("oldhash".to_string()))
        }
        async fn pull(&self, _path: &Path) -> Result<(), GitError> {
            Ok(())
        }
        async fn changed_files(
            &self,
            _path: &Path,
            _old: &str,
            _new: &str,
        ) -> Result<Vec<String>, GitError> {
            Ok(vec![])
        }
    }

    struct OkPipeline;

    #[async_trait]
    impl IndexPipeline for OkPipeline {
        async fn run(
            &self,
            _local_path: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PipelineOutput, PipelineError> {
            Ok(PipelineOutput {
                document_count: 1,
                embedding_count: 1,
            })
        }
    }

    /// An `IndexPipeline` that sleeps before returning, so a test can force
    /// two dispatches for the same key to overlap in real time.
    struct SlowPipeline {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IndexPipeline for SlowPipeline {
        async fn run(
            &self,
            _local_path: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PipelineOutput, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(PipelineOutput {
                document_count: 1,
                embedding_count: 1,
            })
        }
    }

    async fn make_scheduler() -> (TempDir, Arc<Scheduler>, ProjectKey) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
        let key = ProjectKey::new(RepoType::Github, "alice", "repo");
        let record = ProjectRecord::new(&key, "https://github.com/alice/repo", 60, None, true, Utc::now());
        store.save(record).await.unwrap();

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            Arc::new(AlwaysUpdatedGit),
            Arc::new(OkPipeline),
            dir.path().join("repos"),
            3,
            chrono::Duration::seconds(30),
            50,
        ));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            engine,
            std::time::Duration::from_millis(50),
            3,
            chrono::Duration::seconds(30),
            chrono::Duration::minutes(60),
            1,
        ));

        (dir, scheduler, key)
    }

    #[tokio::test]
    async fn trigger_runs_and_completes_a_registered_project() {
        let (_dir, scheduler, key) = make_scheduler().await;
        scheduler.start(false, None).await;

        let result = scheduler.trigger(key).await;
        assert!(result.success);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn scheduled_loop_eventually_completes_a_due_project() {
        let (_dir, scheduler, key) = make_scheduler().await;
        scheduler.start(false, None).await;

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        scheduler.stop().await;

        let record = scheduler.store.get(&key).await.unwrap();
        assert_eq!(record.status, SyncStatus::Completed);
    }

    /// Reproduces the scheduled-selection / manual-trigger race directly: a
    /// scheduled dispatch and a manual trigger for the same key land at
    /// (almost) the same instant. Only one must reach `engine.run`; the
    /// other must coalesce onto its result.
    #[tokio::test]
    async fn concurrent_scheduled_and_manual_dispatch_do_not_double_run_the_same_key() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
        let key = ProjectKey::new(RepoType::Github, "alice", "repo");
        let record = ProjectRecord::new(&key, "https://github.com/alice/repo", 60, None, true, Utc::now());
        store.save(record.clone()).await.unwrap();

        let pipeline = Arc::new(SlowPipeline {
            calls: AtomicUsize::new(0),
        });
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            Arc::new(AlwaysUpdatedGit),
            pipeline.clone(),
            dir.path().join("repos"),
            3,
            chrono::Duration::seconds(30),
            50,
        ));

        // Concurrency budget of 4: if `run_tracked` failed to guard on
        // `in_flight`, both dispatches below would run the engine in parallel.
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            engine,
            std::time::Duration::from_secs(60),
            3,
            chrono::Duration::seconds(30),
            chrono::Duration::minutes(60),
            4,
        ));

        tokio::join!(
            scheduler.run_tracked(record.clone(), false, TriggeredBy::Scheduler, None),
            scheduler.run_tracked(record.clone(), true, TriggeredBy::Manual, None),
        );

        assert_eq!(
            pipeline.calls.load(Ordering::SeqCst),
            1,
            "a key already in flight must be coalesced onto the running execution, not re-run"
        );
    }

    #[tokio::test]
    async fn running_reflects_start_and_stop() {
        let (_dir, scheduler, _key) = make_scheduler().await;
        assert!(!scheduler.running().await);

        scheduler.start(false, None).await;
        assert!(scheduler.running().await);

        scheduler.stop().await;
        assert!(!scheduler.running().await);
    }
}
