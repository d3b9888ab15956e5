//! Data model: `ProjectRecord`, `HistoryEntry`, and the project key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of upstream hosting conventions. Modeled as a tagged
/// variant rather than a free-form string so the per-type URL and directory
/// naming rules can be dispatched with a `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Github,
    Gitlab,
    Bitbucket,
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepoType::Github => "github",
            RepoType::Gitlab => "gitlab",
            RepoType::Bitbucket => "bitbucket",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RepoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(RepoType::Github),
            "gitlab" => Ok(RepoType::Gitlab),
            "bitbucket" => Ok(RepoType::Bitbucket),
            other => Err(format!("unknown repo_type: {other}")),
        }
    }
}

/// The triple that uniquely identifies a registered repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectKey {
    pub repo_type: RepoType,
    pub owner: String,
    pub repo: String,
}

impl ProjectKey {
    pub fn new(repo_type: RepoType, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            repo_type,
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Filename for this key's persisted record: `{repo_type}_{owner}_{repo}.json`,
    /// with `/` and `:` replaced by `_`.
    pub fn file_stem(&self) -> String {
        let raw = format!("{}_{}_{}", self.repo_type, self.owner, self.repo);
        raw.replace(['/', ':'], "_")
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repo_type, self.owner, self.repo)
    }
}

impl Ord for RepoType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for RepoType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Scheduler,
    Manual,
    Webhook,
}

/// One entry in a record's bounded history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
    pub commit_hash: Option<String>,
    pub document_count: Option<u64>,
    pub embedding_count: Option<u64>,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub triggered_by: TriggeredBy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Failed,
}

/// One registered repository's durable sync state.
///
/// `access_token`, if present, is written to disk but must never appear in
/// any outward-facing view (see [`crate::registry::OutwardRecord`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub repo_type: RepoType,

    /// Sync cadence in minutes (≥ 1).
    pub sync_interval_minutes: i64,
    pub enabled: bool,
    #[serde(default)]
    pub access_token: Option<String>,

    pub status: SyncStatus,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_commit_hash: Option<String>,
    #[serde(default)]
    pub next_sync: Option<DateTime<Utc>>,

    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub embedding_count: u64,

    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_retry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub total_syncs: u64,
    #[serde(default)]
    pub successful_syncs: u64,
    #[serde(default)]
    pub failed_syncs: u64,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ProjectRecord {
    /// A freshly registered record: `pending`, immediately due (`next_sync = None`).
    pub fn new(
        key: &ProjectKey,
        repo_url: impl Into<String>,
        sync_interval_minutes: i64,
        access_token: Option<String>,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            owner: key.owner.clone(),
            repo: key.repo.clone(),
            repo_type: key.repo_type,
            sync_interval_minutes,
            enabled,
            access_token,
            status: SyncStatus::Pending,
            last_synced: None,
            last_commit_hash: None,
            next_sync: None,
            document_count: 0,
            embedding_count: 0,
            retry_count: 0,
            last_retry: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            total_syncs: 0,
            successful_syncs: 0,
            failed_syncs: 0,
            history: Vec::new(),
        }
    }

    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(self.repo_type, self.owner.clone(), self.repo.clone())
    }

    pub fn sync_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.sync_interval_minutes.max(1))
    }

    /// Push a new entry to the front of `history`, trimming to `capacity`.
    pub fn push_history(&mut self, entry: HistoryEntry, capacity: usize) {
        self.history.insert(0, entry);
        self.history.truncate(capacity);
    }
}
