//! `clap`-derived CLI surface over the [`crate::registry::Registry`] API.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::metadata::record::{ProjectKey, RepoType};

#[derive(Parser)]
#[command(name = "sync-cli")]
#[command(about = "Administer registered repositories and their sync state", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the per-project metadata files
    #[arg(long, global = true, env = "SYNC_METADATA_DIR")]
    pub metadata_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Commands {
    /// Register a new repository, or update an existing one's mutable fields
    Add {
        /// Upstream clone URL
        repo_url: String,
        /// Repository owner/org
        owner: String,
        /// Repository name
        repo: String,
        /// Upstream hosting convention
        #[arg(long, value_enum, default_value = "github")]
        repo_type: RepoTypeArg,
        /// Sync cadence in minutes (defaults to the configured default)
        #[arg(long)]
        sync_interval: Option<i64>,
        /// Access token for private repositories
        #[arg(long, env = "SYNC_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
        /// Register disabled (excluded from selection until re-enabled)
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a registered repository
    Remove(ProjectKeyArgs),

    /// Show one repository's current record
    Get(ProjectKeyArgs),

    /// List all registered repositories
    List,

    /// Update a repository's cadence and/or enabled flag
    Update {
        #[command(flatten)]
        key: ProjectKeyArgs,
        #[arg(long)]
        sync_interval: Option<i64>,
        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Clear retry state and revive a sticky-failed repository
    ResetRetries(ProjectKeyArgs),

    /// Preview whether upstream has diverged, without writing anything
    CheckUpdates(ProjectKeyArgs),

    /// Show a repository's sync history
    History {
        #[command(flatten)]
        key: ProjectKeyArgs,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Trigger an immediate sync, bypassing the no-updates short-circuit
    Trigger(ProjectKeyArgs),

    /// Show aggregate statistics across all registered repositories
    Stats,
}

#[derive(clap::Args)]
pub struct ProjectKeyArgs {
    /// Repository owner/org
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Upstream hosting convention
    #[arg(long, value_enum, default_value = "github")]
    pub repo_type: RepoTypeArg,
}

impl ProjectKeyArgs {
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(self.repo_type.into(), self.owner.clone(), self.repo.clone())
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum RepoTypeArg {
    Github,
    Gitlab,
    Bitbucket,
}

impl From<RepoTypeArg> for RepoType {
    fn from(value: RepoTypeArg) -> Self {
        match value {
            RepoTypeArg::Github => RepoType::Github,
            RepoTypeArg::Gitlab => RepoType::Gitlab,
            RepoTypeArg::Bitbucket => RepoType::Bitbucket,
        }
    }
}
