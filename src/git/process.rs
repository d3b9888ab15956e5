//! `ProcessGitProvider`: shells out to the system `git` binary.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{authenticated_url, redact_token, GitError, GitProvider};
use crate::metadata::record::RepoType;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const CLONE_TIMEOUT: Duration = Duration::from_secs(120);
const PULL_TIMEOUT: Duration = Duration::from_secs(120);
const QUICK_TIMEOUT: Duration = Duration::from_secs(30);

const CANDIDATE_REFS: &[&str] = &["origin/main", "origin/master", "origin/HEAD"];

/// `GitProvider` backed by subprocess invocations of the system `git`.
/// Every command runs with `GIT_TERMINAL_PROMPT=0` so a missing credential
/// fails fast instead of hanging on an interactive prompt, and every error
/// string is redacted before it leaves this module.
pub struct ProcessGitProvider;

impl ProcessGitProvider {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        mut cmd: Command,
        op_timeout: Duration,
        token: Option<&str>,
    ) -> Result<Output, GitError> {
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        let output = timeout(op_timeout, cmd.output())
            .await
            .map_err(|_| GitError::Timeout(op_timeout))?
            .map_err(|e| GitError::Io(redact_token(&e.to_string(), token)))?;
        Ok(output)
    }

    fn stderr_of(output: &Output, token: Option<&str>) -> String {
        redact_token(&String::from_utf8_lossy(&output.stderr), token)
    }
}

impl Default for ProcessGitProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitProvider for ProcessGitProvider {
    async fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        repo_type: RepoType,
        token: Option<&str>,
    ) -> Result<(), GitError> {
        let clone_url = authenticated_url(url, repo_type, token);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GitError::Io(e.to_string()))?;
        }

        info!(path = %path.display(), "cloning repository");

        let mut cmd = Command::new("git");
        cmd.arg("clone").arg("--depth=1").arg(&clone_url).arg(path);

        let output = Self::run(cmd, CLONE_TIMEOUT, token).await?;

        if !output.status.success() {
            let stderr = Self::stderr_of(&output, token);
            warn!(path = %path.display(), %stderr, "git clone failed");
            return Err(GitError::CloneFailed(stderr));
        }

        Ok(())
    }

    async fn fetch_and_remote_head(&self, path: &Path) -> Result<Option<String>, GitError> {
        let path_buf: PathBuf = path.to_path_buf();

        let mut fetch = Command::new("git");
        fetch.arg("-C").arg(&path_buf).arg("fetch").arg("origin");
        let output = Self::run(fetch, FETCH_TIMEOUT, None).await?;

        if !output.status.success() {
            let stderr = Self::stderr_of(&output, None);
            return Err(GitError::Unreachable(stderr));
        }

        for candidate in CANDIDATE_REFS {
            let mut rev_parse = Command::new("git");
            rev_parse
                .arg("-C")
                .arg(&path_buf)
                .arg("rev-parse")
                .arg(candidate);

            let output = Self::run(rev_parse, QUICK_TIMEOUT, None).await?;
            if output.status.success() {
                let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !hash.is_empty() {
                    return Ok(Some(hash));
                }
            }
            debug!(path = %path_buf.display(), candidate, "remote ref not found, trying next");
        }

        Ok(None)
    }

    async fn local_head(&self, path: &Path) -> Result<Option<String>, GitError> {
        if !path.join(".git").exists() {
            return Ok(None);
        }

        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(path).arg("rev-parse").arg("HEAD");
        let output = Self::run(cmd, QUICK_TIMEOUT, None).await?;

        if !output.status.success() {
            return Ok(None);
        }

        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if hash.is_empty() { None } else { Some(hash) })
    }

    async fn pull(&self, path: &Path) -> Result<(), GitError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(path).arg("pull").arg("--ff-only").arg("origin");

        let output = Self::run(cmd, PULL_TIMEOUT, None).await?;

        if !output.status.success() {
            let stderr = Self::stderr_of(&output, None);
            warn!(path = %path.display(), %stderr, "git pull failed");
            return Err(GitError::PullFailed(stderr));
        }

        Ok(())
    }

    async fn changed_files(
        &self,
        path: &Path,
        old: &str,
        new: &str,
    ) -> Result<Vec<String>, GitError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(path)
            .arg("diff")
            .arg("--name-only")
            .arg(format!("{old}..{new}"));

        let output = Self::run(cmd, QUICK_TIMEOUT, None).await?;

        if !output.status.success() {
            let stderr = Self::stderr_of(&output, None);
            return Err(GitError::Io(stderr));
        }

        let files = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect();

        Ok(files)
    }
}
