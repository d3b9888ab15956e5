//! Durable, crash-safe, concurrency-safe storage for `ProjectRecord`s.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::record::{ProjectKey, ProjectRecord, SyncStatus};
use crate::error::Result;

/// File-backed metadata store: one JSON file per project key, atomically
/// replaced on every write, mirrored in an in-memory index guarded by a
/// mutex so concurrent workers can call its operations safely.
pub struct MetadataStore {
    dir: PathBuf,
    index: Arc<Mutex<BTreeMap<ProjectKey, ProjectRecord>>>,
}

impl MetadataStore {
    /// Open (creating if necessary) the metadata directory and load every
    /// record file found in it. Malformed files are logged and skipped —
    /// a corrupt record must never prevent startup.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<ProjectRecord>(&contents) {
                    Ok(record) => {
                        index.insert(record.key(), record);
                    }
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "skipping malformed metadata file");
                    }
                },
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to read metadata file");
                }
            }
        }

        debug!(count = index.len(), "loaded metadata records");

        Ok(Self {
            dir,
            index: Arc::new(Mutex::new(index)),
        })
    }

    fn path_for(&self, key: &ProjectKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    /// Create or replace a record. Sets `created_at` on first write for this
    /// key, always stamps `updated_at`, persists atomically, and updates the
    /// in-memory index.
    pub async fn save(&self, mut record: ProjectRecord) -> Result<ProjectRecord> {
        let now = Utc::now();
        let key = record.key();

        let mut index = self.index.lock().await;
        if let Some(existing) = index.get(&key) {
            record.created_at = existing.created_at;
        }
        record.updated_at = now;

        write_atomic(&self.path_for(&key), &record)?;
        index.insert(key, record.clone());

        Ok(record)
    }

    pub async fn get(&self, key: &ProjectKey) -> Option<ProjectRecord> {
        self.index.lock().await.get(key).cloned()
    }

    pub async fn get_all(&self) -> Vec<ProjectRecord> {
        self.index.lock().await.values().cloned().collect()
    }

    pub async fn delete(&self, key: &ProjectKey) -> Result<bool> {
        let mut index = self.index.lock().await;
        let existed = index.remove(key).is_some();
        if existed {
            let path = self.path_for(key);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(existed)
    }

    /// Records eligible to run right now, ordered by `next_sync` ascending
    /// (records with `next_sync = None` sort first, as the most overdue).
    pub async fn select_due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        retry_base_delay: chrono::Duration,
    ) -> Vec<ProjectRecord> {
        let index = self.index.lock().await;
        let mut due: Vec<ProjectRecord> = index
            .values()
            .filter(|r| is_due(r, now, max_retries, retry_base_delay))
            .cloned()
            .collect();

        due.sort_by_key(|r| r.next_sync.unwrap_or(DateTime::<Utc>::MIN_UTC));
        due
    }

    /// Startup recovery: any record left `in_progress` is crash residue.
    /// Transition it to `pending`, clear `error_message`, leave counters
    /// untouched. This is the only permitted out-of-band write.
    pub async fn recover_in_progress(&self) -> Result<usize> {
        let keys: Vec<ProjectKey> = {
            let index = self.index.lock().await;
            index
                .values()
                .filter(|r| r.status == SyncStatus::InProgress)
                .map(|r| r.key())
                .collect()
        };

        let mut recovered = 0;
        for key in keys {
            if let Some(mut record) = self.get(&key).await {
                record.status = SyncStatus::Pending;
                record.error_message = None;
                self.save(record).await?;
                recovered += 1;
            }
        }

        if recovered > 0 {
            error!(count = recovered, "recovered in_progress records left by a prior crash");
        }

        Ok(recovered)
    }
}

fn is_due(
    record: &ProjectRecord,
    now: DateTime<Utc>,
    max_retries: u32,
    retry_base_delay: chrono::Duration,
) -> bool {
    if !record.enabled {
        return false;
    }
    if record.status == SyncStatus::InProgress {
        return false;
    }

    if record.status == SyncStatus::Failed && record.retry_count > 0 {
        if record.retry_count >= max_retries {
            return false;
        }
        let Some(last_retry) = record.last_retry else {
            return false;
        };
        let backoff = retry_base_delay * 2i32.pow(record.retry_count);
        if last_retry + backoff > now {
            return false;
        }
    }

    match record.next_sync {
        None => true,
        Some(next_sync) => next_sync <= now,
    }
}

/// Write `record` to `path` atomically: serialize to a temp file in the
/// same directory, fsync it, then rename over the destination. The rename
/// is atomic on the same filesystem, so readers never observe a partial file.
fn write_atomic(path: &Path, record: &ProjectRecord) -> Result<()> {
    let dir = path.parent().expect("record path always has a parent");
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().unwrap().to_string_lossy(),
        std::process::id()
    ));

    let json = serde_json::to_string_pretty(record)?;

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    if let Ok(dir_handle) = fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }

    Ok(())
}
