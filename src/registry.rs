//! `Registry`: the administrative surface over the metadata store, exposed
//! to the CLI (and, in a fuller deployment, an HTTP layer outside this
//! crate's scope).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::git::GitProvider;
use crate::metadata::record::{HistoryEntry, ProjectKey, ProjectRecord, RepoType, SyncStatus};
use crate::metadata::store::MetadataStore;
use crate::scheduler::Scheduler;
use crate::sync_engine::SyncResult;

/// `ProjectRecord` with `access_token` removed — the shape returned by
/// every outward-facing Registry operation.
#[derive(Debug, Clone, Serialize)]
pub struct OutwardRecord {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub repo_type: RepoType,
    pub sync_interval_minutes: i64,
    pub enabled: bool,
    pub status: SyncStatus,
    pub last_synced: Option<chrono::DateTime<Utc>>,
    pub last_commit_hash: Option<String>,
    pub next_sync: Option<chrono::DateTime<Utc>>,
    pub document_count: u64,
    pub embedding_count: u64,
    pub retry_count: u32,
    pub last_retry: Option<chrono::DateTime<Utc>>,
    pub error_message: Option<String>,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
}

impl From<ProjectRecord> for OutwardRecord {
    fn from(r: ProjectRecord) -> Self {
        Self {
            repo_url: r.repo_url,
            owner: r.owner,
            repo: r.repo,
            repo_type: r.repo_type,
            sync_interval_minutes: r.sync_interval_minutes,
            enabled: r.enabled,
            status: r.status,
            last_synced: r.last_synced,
            last_commit_hash: r.last_commit_hash,
            next_sync: r.next_sync,
            document_count: r.document_count,
            embedding_count: r.embedding_count,
            retry_count: r.retry_count,
            last_retry: r.last_retry,
            error_message: r.error_message,
            total_syncs: r.total_syncs,
            successful_syncs: r.successful_syncs,
            failed_syncs: r.failed_syncs,
        }
    }
}

/// Read-only preview of an update check, produced without writing to the store.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheck {
    pub has_updates: bool,
    pub remote_commit: Option<String>,
    pub local_commit: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub running: bool,
    pub total_projects: usize,
    pub status_counts: HashMap<String, usize>,
    pub success_rate: f64,
}

/// The administrative surface over a `MetadataStore` and a running
/// `Scheduler`. Every mutating operation here is independent of the
/// scheduler's tick — the scheduler only ever observes the store's state,
/// so registry writes and supervisor ticks interleave safely.
pub struct Registry {
    store: Arc<MetadataStore>,
    git: Arc<dyn GitProvider>,
    scheduler: Arc<Scheduler>,
    default_sync_interval_minutes: i64,
}

impl Registry {
    pub fn new(
        store: Arc<MetadataStore>,
        git: Arc<dyn GitProvider>,
        scheduler: Arc<Scheduler>,
        default_sync_interval_minutes: i64,
    ) -> Self {
        Self {
            store,
            git,
            scheduler,
            default_sync_interval_minutes,
        }
    }

    /// Upsert semantics: if the key exists, update mutable fields in place
    /// without touching status, timings, or counters. If new, create a
    /// fresh, immediately-due record.
    pub async fn add(
        &self,
        repo_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        repo_type: RepoType,
        sync_interval_minutes: Option<i64>,
        access_token: Option<String>,
        enabled: bool,
    ) -> Result<ProjectRecord> {
        let owner = owner.into();
        let repo = repo.into();
        let key = ProjectKey::new(repo_type, owner.clone(), repo.clone());
        let repo_url = repo_url.into();
        let interval = sync_interval_minutes.unwrap_or(self.default_sync_interval_minutes);

        if interval < 1 {
            return Err(SyncError::InvalidArgument(format!(
                "sync_interval_minutes must be >= 1, got {interval}"
            )));
        }

        if let Some(mut existing) = self.store.get(&key).await {
            existing.repo_url = repo_url;
            existing.sync_interval_minutes = interval;
            existing.enabled = enabled;
            if access_token.is_some() {
                existing.access_token = access_token;
            }
            return self.store.save(existing).await;
        }

        let record = ProjectRecord::new(&key, repo_url, interval, access_token, enabled, Utc::now());
        self.store.save(record).await
    }

    pub async fn remove(&self, key: &ProjectKey) -> Result<bool> {
        self.store.delete(key).await
    }

    pub async fn get(&self, key: &ProjectKey) -> Option<OutwardRecord> {
        self.store.get(key).await.map(OutwardRecord::from)
    }

    pub async fn list(&self) -> Vec<OutwardRecord> {
        self.store.get_all().await.into_iter().map(OutwardRecord::from).collect()
    }

    /// Updates cadence and/or enabled flag. Re-enabling resets retry state
    /// and recomputes `next_sync` from the last sync time.
    pub async fn update(
        &self,
        key: &ProjectKey,
        sync_interval_minutes: Option<i64>,
        enabled: Option<bool>,
    ) -> Result<Option<OutwardRecord>> {
        let Some(mut record) = self.store.get(key).await else {
            return Ok(None);
        };

        if let Some(interval) = sync_interval_minutes {
            if interval < 1 {
                return Err(SyncError::InvalidArgument(format!(
                    "sync_interval_minutes must be >= 1, got {interval}"
                )));
            }
            record.sync_interval_minutes = interval;
        }

        let was_disabled = !record.enabled;
        if let Some(enabled) = enabled {
            record.enabled = enabled;
        }

        if was_disabled && record.enabled {
            record.retry_count = 0;
            record.next_sync = record.last_synced.map(|ts| ts + record.sync_interval());
        }

        let saved = self.store.save(record).await?;
        Ok(Some(OutwardRecord::from(saved)))
    }

    /// Clears retry state. If the record is stuck `failed`, brings it back
    /// to `pending` and makes it immediately due.
    pub async fn reset_retries(&self, key: &ProjectKey) -> Result<Option<OutwardRecord>> {
        let Some(mut record) = self.store.get(key).await else {
            return Ok(None);
        };

        record.retry_count = 0;
        record.last_retry = None;
        if record.status == SyncStatus::Failed {
            record.status = SyncStatus::Pending;
            record.next_sync = Some(Utc::now());
        }

        let saved = self.store.save(record).await?;
        Ok(Some(OutwardRecord::from(saved)))
    }

    /// Read-only preview: consults `GitProvider` without writing to the store.
    pub async fn check_updates(&self, key: &ProjectKey, repos_dir: &std::path::Path) -> Result<Option<UpdateCheck>> {
        let Some(record) = self.store.get(key).await else {
            return Ok(None);
        };

        let local_path = repos_dir.join(key.file_stem());
        if !local_path.join(".git").exists() {
            return Ok(Some(UpdateCheck {
                has_updates: true,
                remote_commit: None,
                local_commit: None,
                reason: Some("not cloned".to_string()),
            }));
        }

        match self.git.fetch_and_remote_head(&local_path).await {
            Ok(remote_commit) => {
                let local_commit = self.git.local_head(&local_path).await.ok().flatten();
                let has_updates = remote_commit != local_commit || remote_commit != record.last_commit_hash;
                Ok(Some(UpdateCheck {
                    has_updates,
                    remote_commit,
                    local_commit,
                    reason: None,
                }))
            }
            Err(e) => Ok(Some(UpdateCheck {
                has_updates: false,
                remote_commit: None,
                local_commit: record.last_commit_hash.clone(),
                reason: Some(format!("remote unreachable: {e}")),
            })),
        }
    }

    pub async fn history(&self, key: &ProjectKey, limit: usize) -> Option<Vec<HistoryEntry>> {
        let record = self.store.get(key).await?;
        Some(record.history.into_iter().take(limit).collect())
    }

    pub async fn trigger(&self, key: ProjectKey) -> SyncResult {
        self.scheduler.trigger(key).await
    }

    pub async fn stats(&self) -> RegistryStats {
        let records = self.store.get_all().await;
        let total_projects = records.len();

        let mut status_counts: HashMap<String, usize> = HashMap::new();
        let mut total_syncs = 0u64;
        let mut successful_syncs = 0u64;

        for record in &records {
            *status_counts.entry(format!("{:?}", record.status).to_lowercase()).or_default() += 1;
            total_syncs += record.total_syncs;
            successful_syncs += record.successful_syncs;
        }

        let success_rate = if total_syncs > 0 {
            successful_syncs as f64 / total_syncs as f64
        } else {
            0.0
        };

        RegistryStats {
            running: self.scheduler.running().await,
            total_projects,
            status_counts,
            success_rate,
        }
    }
}
