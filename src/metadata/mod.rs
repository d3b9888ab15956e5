//! Durable per-project metadata: the data model and the on-disk store.

pub mod record;
pub mod store;

pub use record::{
    HistoryEntry, HistoryStatus, ProjectKey, ProjectRecord, RepoType, SyncStatus, TriggeredBy,
};
pub use store::MetadataStore;
