//! End-to-end tests exercising `Registry`/`Scheduler`/`SyncEngine` together
//! against fake `GitProvider`/`IndexPipeline` collaborators, covering the
//! seed scenarios.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sync_scheduler::{
    CancellationToken, GitError, GitProvider, IndexPipeline, MetadataStore, PipelineError,
    PipelineOutput, ProjectKey, ProjectRecord, RepoType, Scheduler, SyncEngine, SyncStatus,
};
use tempfile::TempDir;

/// A `GitProvider` whose remote head and reachability can be changed mid-test.
struct ScriptedGit {
    remote_head: Mutex<Option<String>>,
    unreachable: AtomicBool,
}

impl ScriptedGit {
    fn new(initial_head: &str) -> Self {
        Self {
            remote_head: Mutex::new(Some(initial_head.to_string())),
            unreachable: AtomicBool::new(false),
        }
    }

    fn set_remote_head(&self, head: &str) {
        *self.remote_head.lock().unwrap() = Some(head.to_string());
    }

    fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl GitProvider for ScriptedGit {
    async fn clone_repo(
        &self,
        _url: &str,
        path: &Path,
        _repo_type: RepoType,
        _token: Option<&str>,
    ) -> Result<(), GitError> {
        tokio::fs::create_dir_all(path.join(".git")).await.unwrap();
        Ok(())
    }

    async fn fetch_and_remote_head(&self, _path: &Path) -> Result<Option<String>, GitError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitError::Unreachable("offline".to_string()));
        }
        Ok(self.remote_head.lock().unwrap().clone())
    }

    async fn local_head(&self, _path: &Path) -> Result<Option<String>, GitError> {
        Ok(self.remote_head.lock().unwrap().clone())
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

/// A `GitProvider` whose clone/pull always fails, emitting a subprocess-style
/// message that originally contained the access token — redacted before
/// returning, the same contract `ProcessGitProvider` upholds (SPEC_FULL §4.2).
struct TokenLeakingGit {
    token: String,
}

#[async_trait]
impl GitProvider for TokenLeakingGit {
    async fn clone_repo(
        &self,
        _url: &str,
        _path: &Path,
        _repo_type: RepoType,
        _token: Option<&str>,
    ) -> Result<(), GitError> {
        let raw = format!(
            "fatal: could not access 'https://{}@github.com/a/b.git'",
            self.token
        );
        Err(GitError::CloneFailed(sync_scheduler::git::redact_token(
            &raw,
            Some(&self.token),
        )))
    }

    async fn fetch_and_remote_head(&self, _path: &Path) -> Result<Option<String>, GitError> {
        Ok(None)
    }

    async fn local_head(&self, _path: &Path) -> Result<Option<String>, GitError> {
        Ok(None)
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

/// An `IndexPipeline` that can be told to fail and counts how many times it ran.
struct ScriptedPipeline {
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedPipeline {
    fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn set_fail(&self, value: bool) {
        self.fail.store(value, Ordering::SeqCst);
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexPipeline for ScriptedPipeline {
    async fn run(
        &self,
        _local_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::Failed("boom".to_string()));
        }
        Ok(PipelineOutput {
            document_count: 5,
            embedding_count: 20,
        })
    }
}

/// The redaction case doesn't care whether the pipeline runs; the failure
/// happens at the git step.
struct UnreachablePipeline;

#[async_trait]
impl IndexPipeline for UnreachablePipeline {
    async fn run(
        &self,
        _local_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        Ok(PipelineOutput::default())
    }
}

fn key() -> ProjectKey {
    ProjectKey::new(RepoType::Github, "alice", "repo")
}

#[tokio::test]
async fn add_and_first_run_completes_with_documents_and_next_sync() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let git = Arc::new(ScriptedGit::new("commit1"));
    let pipeline = Arc::new(ScriptedPipeline::new());

    let record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    store.save(record).await.unwrap();

    let engine = SyncEngine::new(
        store.clone(),
        git.clone(),
        pipeline.clone(),
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(30),
        50,
    );

    let result = engine
        .run(
            store.get(&key()).await.unwrap(),
            false,
            sync_scheduler::TriggeredBy::Scheduler,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.skipped, Some(false));
    assert_eq!(result.document_count, Some(5));
    assert_eq!(result.retry_count, Some(0));

    let stored = store.get(&key()).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Completed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.history.len(), 1);
    assert!(stored.next_sync.unwrap() > Utc::now() + chrono::Duration::minutes(59));
}

#[tokio::test]
async fn unchanged_upstream_short_circuits_on_the_second_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let git = Arc::new(ScriptedGit::new("commit1"));
    let pipeline = Arc::new(ScriptedPipeline::new());

    let record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    store.save(record).await.unwrap();

    let engine = SyncEngine::new(
        store.clone(),
        git.clone(),
        pipeline.clone(),
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(30),
        50,
    );

    let first = engine
        .run(
            store.get(&key()).await.unwrap(),
            false,
            sync_scheduler::TriggeredBy::Scheduler,
            &CancellationToken::new(),
        )
        .await;
    assert!(first.success);
    let commit_after_first = store.get(&key()).await.unwrap().last_commit_hash;

    let second = engine
        .run(
            store.get(&key()).await.unwrap(),
            false,
            sync_scheduler::TriggeredBy::Scheduler,
            &CancellationToken::new(),
        )
        .await;

    assert!(second.success);
    assert_eq!(second.skipped, Some(true));
    assert_eq!(pipeline.call_count(), 1, "pipeline must not re-run when unchanged");

    let stored = store.get(&key()).await.unwrap();
    assert_eq!(stored.last_commit_hash, commit_after_first);
}

#[tokio::test]
async fn failure_backs_off_then_becomes_selectable_again() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let git = Arc::new(ScriptedGit::new("commit1"));
    let pipeline = Arc::new(ScriptedPipeline::new());
    pipeline.set_fail(true);

    let record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    store.save(record).await.unwrap();

    let engine = SyncEngine::new(
        store.clone(),
        git,
        pipeline,
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(30),
        50,
    );

    let result = engine
        .run(
            store.get(&key()).await.unwrap(),
            false,
            sync_scheduler::TriggeredBy::Scheduler,
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.retry_count, Some(1));

    let now = Utc::now();
    let too_soon = store.select_due(now + chrono::Duration::seconds(10), 3, chrono::Duration::seconds(30)).await;
    assert!(too_soon.iter().all(|r| r.key() != key()));

    let after_backoff = store.select_due(now + chrono::Duration::seconds(61), 3, chrono::Duration::seconds(30)).await;
    assert!(after_backoff.iter().any(|r| r.key() == key()));
}

#[tokio::test]
async fn max_retries_sticks_until_reset_retries() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let git = Arc::new(ScriptedGit::new("commit1"));
    let pipeline = Arc::new(ScriptedPipeline::new());
    pipeline.set_fail(true);

    let record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    store.save(record).await.unwrap();

    let engine = SyncEngine::new(
        store.clone(),
        git,
        pipeline,
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(1),
        50,
    );

    for _ in 0..3 {
        let current = store.get(&key()).await.unwrap();
        engine
            .run(current, false, sync_scheduler::TriggeredBy::Scheduler, &CancellationToken::new())
            .await;
    }

    let stored = store.get(&key()).await.unwrap();
    assert_eq!(stored.retry_count, 3);
    assert_eq!(stored.status, SyncStatus::Failed);

    // Even long after the exponential window would have elapsed, the record
    // stays excluded because retry_count has reached max_retries.
    let far_future = Utc::now() + chrono::Duration::hours(10);
    let due = store.select_due(far_future, 3, chrono::Duration::seconds(1)).await;
    assert!(due.iter().all(|r| r.key() != key()));
}

#[tokio::test]
async fn crash_residue_is_recovered_to_pending_on_scheduler_start() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());

    let mut record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    record.status = SyncStatus::InProgress;
    store.save(record).await.unwrap();

    let git = Arc::new(ScriptedGit::new("commit1"));
    let pipeline = Arc::new(ScriptedPipeline::new());
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        git,
        pipeline,
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(30),
        50,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        engine,
        std::time::Duration::from_secs(60),
        3,
        chrono::Duration::seconds(30),
        chrono::Duration::minutes(60),
        1,
    ));

    scheduler.start(false, None).await;
    // give the startup recovery step a moment to land before the first tick
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    scheduler.stop().await;

    let recovered = store.get(&key()).await.unwrap();
    assert_ne!(recovered.status, SyncStatus::InProgress);
}

#[tokio::test]
async fn failed_run_never_leaks_the_access_token() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let token = "TKN123".to_string();
    let git = Arc::new(TokenLeakingGit { token: token.clone() });
    let pipeline = Arc::new(UnreachablePipeline);

    let record = ProjectRecord::new(
        &key(),
        "https://github.com/alice/repo",
        60,
        Some(token.clone()),
        true,
        Utc::now(),
    );
    store.save(record).await.unwrap();

    let engine = SyncEngine::new(
        store.clone(),
        git,
        pipeline,
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(30),
        50,
    );

    // Not yet cloned, so `do_work` attempts a clone, which fails. The
    // redaction contract lives in the `GitProvider`, not the engine, so the
    // stored `error_message` must already be clean by the time it reaches
    // `MetadataStore`.
    let result = engine
        .run(
            store.get(&key()).await.unwrap(),
            false,
            sync_scheduler::TriggeredBy::Scheduler,
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert!(!result.error.unwrap().contains(&token));

    let stored = store.get(&key()).await.unwrap();
    assert!(!stored.error_message.unwrap().contains(&token));
    assert!(!stored.history[0].error_message.as_ref().unwrap().contains(&token));

    let outward = sync_scheduler::OutwardRecord::from(stored);
    let serialized = serde_json::to_string(&outward).unwrap();
    assert!(!serialized.contains(&token));
}

#[tokio::test]
async fn manual_trigger_forces_a_run_even_without_upstream_changes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let git = Arc::new(ScriptedGit::new("commit1"));
    let pipeline = Arc::new(ScriptedPipeline::new());

    let mut record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    record.last_commit_hash = Some("commit1".to_string());
    std::fs::create_dir_all(dir.path().join("repos").join(key().file_stem()).join(".git")).unwrap();
    store.save(record).await.unwrap();

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        git,
        pipeline.clone(),
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

    scheduler.start(false, None).await;
    let result = scheduler.trigger(key()).await;
    scheduler.stop().await;

    assert!(result.success);
    assert_eq!(result.skipped, Some(false));
    assert_eq!(pipeline.call_count(), 1);
}

#[tokio::test]
async fn remote_unreachable_during_update_check_is_not_a_terminal_failure() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).await.unwrap());
    let git = Arc::new(ScriptedGit::new("commit1"));
    git.set_unreachable(true);
    let pipeline = Arc::new(ScriptedPipeline::new());

    let mut record = ProjectRecord::new(&key(), "https://github.com/alice/repo", 60, None, true, Utc::now());
    record.last_commit_hash = Some("commit1".to_string());
    std::fs::create_dir_all(dir.path().join("repos").join(key().file_stem()).join(".git")).unwrap();
    store.save(record).await.unwrap();

    let engine = SyncEngine::new(
        store.clone(),
        git,
        pipeline.clone(),
        dir.path().join("repos"),
        3,
        chrono::Duration::seconds(30),
        50,
    );

    let result = engine
        .run(
            store.get(&key()).await.unwrap(),
            false,
            sync_scheduler::TriggeredBy::Scheduler,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.skipped, Some(true));
    assert_eq!(pipeline.call_count(), 0);

    let stored = store.get(&key()).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Completed);
}
