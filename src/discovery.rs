//! `ProjectDiscovery`: the one concrete, file-backed seed source used to
//! auto-register projects at startup. The real discovery source (a
//! wiki-cache scan) is out of scope; this reads a small TOML file instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::metadata::record::RepoType;
use crate::scheduler::{DiscoveredProject, ProjectDiscovery};

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    project: Vec<SeedProject>,
}

#[derive(Debug, Deserialize)]
struct SeedProject {
    repo_url: String,
    owner: String,
    repo: String,
    #[serde(default = "default_repo_type")]
    repo_type: RepoType,
}

fn default_repo_type() -> RepoType {
    RepoType::Github
}

/// Reads a TOML seed file of the shape:
///
/// ```toml
/// [[project]]
/// repo_url = "https://github.com/acme/widgets"
/// owner = "acme"
/// repo = "widgets"
/// repo_type = "github"
/// ```
///
/// A missing file is treated as an empty project list, not an error —
/// auto-registration is opportunistic.
pub struct StaticDiscovery {
    seed_path: PathBuf,
}

impl StaticDiscovery {
    pub fn new(seed_path: impl Into<PathBuf>) -> Self {
        Self {
            seed_path: seed_path.into(),
        }
    }
}

#[async_trait]
impl ProjectDiscovery for StaticDiscovery {
    async fn list(&self) -> anyhow::Result<Vec<DiscoveredProject>> {
        if !Path::new(&self.seed_path).exists() {
            return Ok(Vec::new());
        }

        let contents = tokio::fs::read_to_string(&self.seed_path).await?;
        let seed: SeedFile = toml::from_str(&contents)?;

        Ok(seed
            .project
            .into_iter()
            .map(|p| DiscoveredProject {
                repo_url: p.repo_url,
                owner: p.owner,
                repo: p.repo,
                repo_type: p.repo_type,
            })
            .collect())
    }
}
