//! `SyncEngine`: executes one synchronization against one record.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::bound_message;
use crate::git::{GitError, GitProvider};
use crate::metadata::record::{HistoryEntry, HistoryStatus, ProjectRecord, SyncStatus, TriggeredBy};
use crate::metadata::store::MetadataStore;
use crate::pipeline::{CancellationToken, IndexPipeline, PipelineError};

/// Outcome of one `SyncEngine.run` invocation. Never raises outward; every
/// path through the engine terminates in one of these.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl SyncResult {
    fn skipped(reason: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            success: true,
            skipped: Some(true),
            reason: Some(reason.into()),
            document_count: None,
            embedding_count: None,
            commit_hash: None,
            duration_seconds,
            error: None,
            retry_count: None,
            max_retries: None,
        }
    }
}

/// Executes one synchronization against one record, following the
/// entry → update-check → do-work → terminal-write state machine.
pub struct SyncEngine {
    store: Arc<MetadataStore>,
    git: Arc<dyn GitProvider>,
    pipeline: Arc<dyn IndexPipeline>,
    repos_dir: std::path::PathBuf,
    max_retries: u32,
    retry_base_delay: chrono::Duration,
    history_capacity: usize,
}

impl SyncEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        git: Arc<dyn GitProvider>,
        pipeline: Arc<dyn IndexPipeline>,
        repos_dir: impl Into<std::path::PathBuf>,
        max_retries: u32,
        retry_base_delay: chrono::Duration,
        history_capacity: usize,
    ) -> Self {
        Self {
            store,
            git,
            pipeline,
            repos_dir: repos_dir.into(),
            max_retries,
            retry_base_delay,
            history_capacity,
        }
    }

    fn local_path(&self, record: &ProjectRecord) -> std::path::PathBuf {
        self.repos_dir.join(record.key().file_stem())
    }

    /// Run one synchronization for `record`. `force=true` skips the
    /// no-updates short-circuit (used for manual triggers).
    pub async fn run(
        &self,
        mut record: ProjectRecord,
        force: bool,
        triggered_by: TriggeredBy,
        cancel: &CancellationToken,
    ) -> SyncResult {
        let started = std::time::Instant::now();
        let now = Utc::now();

        record.status = SyncStatus::InProgress;
        record.error_message = None;
        record = match self.store.save(record).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to publish in_progress state");
                return SyncResult {
                    success: false,
                    skipped: None,
                    reason: None,
                    document_count: None,
                    embedding_count: None,
                    commit_hash: None,
                    duration_seconds: started.elapsed().as_secs_f64(),
                    error: Some(bound_message(&e.to_string())),
                    retry_count: None,
                    max_retries: None,
                };
            }
        };

        let local_path = self.local_path(&record);
        let exists = local_path.join(".git").exists();

        let (has_updates, remote_head, unreachable_reason) =
            self.check_for_updates(&record, &local_path, exists).await;

        if !force && !has_updates {
            record.status = SyncStatus::Completed;
            record.retry_count = 0;
            record.next_sync = Some(now + record.sync_interval());
            let reason = unreachable_reason.unwrap_or_else(|| "up to date".to_string());
            if let Err(e) = self.store.save(record).await {
                warn!(error = %e, "failed to persist skip outcome");
            }
            return SyncResult::skipped(reason, started.elapsed().as_secs_f64());
        }

        let work_result = self
            .do_work(&record, &local_path, exists, cancel)
            .await;

        match work_result {
            Ok((document_count, embedding_count)) => {
                let commit_hash = remote_head.clone().or_else(|| record.last_commit_hash.clone());

                record.status = SyncStatus::Completed;
                record.last_synced = Some(now);
                record.last_commit_hash = commit_hash.clone();
                record.document_count = document_count;
                record.embedding_count = embedding_count;
                record.retry_count = 0;
                record.error_message = None;
                record.next_sync = Some(now + record.sync_interval());
                record.total_syncs += 1;
                record.successful_syncs += 1;

                record.push_history(
                    HistoryEntry {
                        timestamp: now,
                        status: HistoryStatus::Completed,
                        commit_hash: commit_hash.clone(),
                        document_count: Some(document_count),
                        embedding_count: Some(embedding_count),
                        duration_seconds: started.elapsed().as_secs_f64(),
                        error_message: None,
                        triggered_by,
                    },
                    self.history_capacity,
                );

                if let Err(e) = self.store.save(record).await {
                    warn!(error = %e, "failed to persist success outcome");
                }

                info!(commit = ?commit_hash, documents = document_count, embeddings = embedding_count, "sync completed");

                SyncResult {
                    success: true,
                    skipped: Some(false),
                    reason: None,
                    document_count: Some(document_count),
                    embedding_count: Some(embedding_count),
                    commit_hash,
                    duration_seconds: started.elapsed().as_secs_f64(),
                    error: None,
                    retry_count: Some(0),
                    max_retries: Some(self.max_retries),
                }
            }
            Err(reason) => {
                let reason = bound_message(&reason);

                record.status = SyncStatus::Failed;
                record.error_message = Some(reason.clone());
                record.retry_count += 1;
                record.last_retry = Some(now);
                record.total_syncs += 1;
                record.failed_syncs += 1;

                record.push_history(
                    HistoryEntry {
                        timestamp: now,
                        status: HistoryStatus::Failed,
                        commit_hash: None,
                        document_count: None,
                        embedding_count: None,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        error_message: Some(reason.clone()),
                        triggered_by,
                    },
                    self.history_capacity,
                );

                record.next_sync = Some(if record.retry_count < self.max_retries {
                    now + self.retry_base_delay * 2i32.pow(record.retry_count)
                } else {
                    now + record.sync_interval()
                });

                let retry_count = record.retry_count;

                if let Err(e) = self.store.save(record).await {
                    warn!(error = %e, "failed to persist failure outcome");
                }

                warn!(%reason, retry_count, "sync failed");

                SyncResult {
                    success: false,
                    skipped: None,
                    reason: None,
                    document_count: None,
                    embedding_count: None,
                    commit_hash: None,
                    duration_seconds: started.elapsed().as_secs_f64(),
                    error: Some(reason),
                    retry_count: Some(retry_count),
                    max_retries: Some(self.max_retries),
                }
            }
        }
    }

    /// Determine whether upstream has diverged from what's locally indexed.
    /// Returns `(has_updates, remote_head, unreachable_reason)`.
    async fn check_for_updates(
        &self,
        record: &ProjectRecord,
        local_path: &std::path::Path,
        exists: bool,
    ) -> (bool, Option<String>, Option<String>) {
        if !exists {
            return (true, None, None);
        }

        match self.git.fetch_and_remote_head(local_path).await {
            Ok(remote_head) => {
                let local_head = self.git.local_head(local_path).await.ok().flatten();
                let has_updates = remote_head != local_head
                    || remote_head != record.last_commit_hash;
                (has_updates, remote_head, None)
            }
            Err(e) => (false, None, Some(format!("remote unreachable: {e}"))),
        }
    }

    /// Clone or pull, then run the index pipeline. Returns bounded error
    /// reasons on failure, matching the engine's failure taxonomy.
    async fn do_work(
        &self,
        record: &ProjectRecord,
        local_path: &std::path::Path,
        exists: bool,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64), String> {
        if exists {
            self.git
                .pull(local_path)
                .await
                .map_err(|e| git_error_reason(&e))?;
        } else {
            self.git
                .clone_repo(
                    &record.repo_url,
                    local_path,
                    record.repo_type,
                    record.access_token.as_deref(),
                )
                .await
                .map_err(|e| git_error_reason(&e))?;
        }

        self.pipeline
            .run(local_path, cancel)
            .await
            .map(|output| (output.document_count, output.embedding_count))
            .map_err(|e| pipeline_error_reason(&e))
    }
}

fn git_error_reason(err: &GitError) -> String {
    match err {
        GitError::CloneFailed(msg) => format!("git_clone_failed: {msg}"),
        GitError::PullFailed(msg) => format!("git_pull_failed: {msg}"),
        GitError::Unreachable(msg) => format!("git_remote_unreachable: {msg}"),
        GitError::Timeout(d) => format!("unexpected: git operation timed out after {d:?}"),
        GitError::Io(msg) => format!("unexpected: {msg}"),
    }
}

fn pipeline_error_reason(err: &PipelineError) -> String {
    match err {
        PipelineError::NoDocuments(_) => "no_documents".to_string(),
        PipelineError::Failed(msg) => format!("index_pipeline_failed: {msg}"),
        PipelineError::Cancelled => "unexpected: index pipeline cancelled".to_string(),
    }
}
