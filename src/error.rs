//! Error taxonomy for the sync scheduler.

use thiserror::Error;

/// Errors surfaced by `MetadataStore`, `GitProvider`, and the sync engine internals.
///
/// `SyncEngine` never lets these escape outward; they are converted into the
/// `SyncResult::Failed` interchange shape at the boundary.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    StoreSerde(#[from] serde_json::Error),

    #[error("git remote unreachable: {0}")]
    GitUnreachable(String),

    #[error("git clone failed: {0}")]
    GitCloneFailed(String),

    #[error("git pull failed: {0}")]
    GitPullFailed(String),

    #[error("index pipeline returned no documents")]
    NoDocuments,

    #[error("index pipeline failed: {0}")]
    IndexPipelineFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Bounds an error message to a fixed length, matching the taxonomy's
/// `unexpected (with bounded message)` contract.
pub fn bound_message(msg: &str) -> String {
    const MAX_LEN: usize = 500;
    if msg.len() <= MAX_LEN {
        msg.to_string()
    } else {
        let mut truncated = msg.chars().take(MAX_LEN).collect::<String>();
        truncated.push_str("...[truncated]");
        truncated
    }
}
