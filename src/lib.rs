//! # sync-scheduler
//!
//! Periodically synchronizes locally-maintained search indexes of source-code
//! repositories against their upstream git remotes. A pool of registered
//! projects is polled on independent cadences; when upstream commits diverge
//! from the last-indexed commit, the repository is re-fetched, its documents
//! are re-parsed and re-embedded, and a per-project state record is durably
//! updated.
//!
//! ## Architecture
//!
//! - [`metadata`] — durable per-project records and the on-disk store
//! - [`git`] — the `GitProvider` collaborator: clone/fetch/pull/diff
//! - [`pipeline`] — the `IndexPipeline` collaborator contract, plus a
//!   filesystem-backed reference implementation
//! - [`sync_engine`] — executes one synchronization against one record,
//!   enforcing the pending/in_progress/completed/failed state machine
//! - [`scheduler`] — the supervisor loop that selects due projects and
//!   drains manual triggers
//! - [`registry`] — the administrative surface (add/update/remove/trigger/...)
//! - [`discovery`] — the `ProjectDiscovery` collaborator used for auto-register
//! - [`config`] — environment-driven tunables
//! - [`chunking`], [`embeddings`] — text-processing utilities backing the
//!   reference `IndexPipeline`

pub mod chunking;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod embeddings;
pub mod error;
pub mod git;
pub mod metadata;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod sync_engine;

pub use config::SchedulerConfig;
pub use discovery::StaticDiscovery;
pub use error::{Result, SyncError};
pub use git::{GitError, GitProvider, ProcessGitProvider};
pub use metadata::{
    HistoryEntry, HistoryStatus, MetadataStore, ProjectKey, ProjectRecord, RepoType, SyncStatus,
    TriggeredBy,
};
pub use pipeline::{CancellationToken, FsIndexPipeline, IndexPipeline, PipelineError, PipelineOutput};
pub use registry::{OutwardRecord, Registry, RegistryStats, UpdateCheck};
pub use scheduler::{DiscoveredProject, ProjectDiscovery, Scheduler};
pub use sync_engine::{SyncEngine, SyncResult};

/// Re-export of the crate's main entry points, for `use sync_scheduler::prelude::*;`.
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::discovery::StaticDiscovery;
    pub use crate::error::{Result, SyncError};
    pub use crate::git::{GitError, GitProvider, ProcessGitProvider};
    pub use crate::metadata::{
        HistoryEntry, HistoryStatus, MetadataStore, ProjectKey, ProjectRecord, RepoType,
        SyncStatus, TriggeredBy,
    };
    pub use crate::pipeline::{
        CancellationToken, FsIndexPipeline, IndexPipeline, PipelineError, PipelineOutput,
    };
    pub use crate::registry::{OutwardRecord, Registry, RegistryStats, UpdateCheck};
    pub use crate::scheduler::{DiscoveredProject, ProjectDiscovery, Scheduler};
    pub use crate::sync_engine::{SyncEngine, SyncResult};
}
