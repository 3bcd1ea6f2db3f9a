//! Git worktree management.
//!
//! Each session gets one worktree and one branch, created under
//! `<repo>/.worktrees/<token>` by shelling out to the `git` binary. Worktree
//! names derive from session-unique tokens, so concurrent creations against
//! the same repository only contend on git's own index locking.

mod error;

pub use error::{WorktreeError, WorktreeResult};

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Directory inside the repository that holds session worktrees.
pub const WORKTREE_DIR: &str = ".worktrees";

/// A worktree reported by `git worktree list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// `None` for a detached HEAD.
    pub branch: Option<String>,
}

/// Check whether `path` is inside a working Git repository.
pub async fn is_git_repository(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Worktree operations against one repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_path: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Path where the worktree for `token` lives.
    pub fn worktree_path(&self, token: &str) -> PathBuf {
        self.repo_path.join(WORKTREE_DIR).join(token)
    }

    async fn run_git(&self, args: &[&str]) -> WorktreeResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(WorktreeError::GitCommand {
                command: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Fail unless the repository path is a valid Git repository.
    pub async fn ensure_repository(&self) -> WorktreeResult<()> {
        if !is_git_repository(&self.repo_path).await {
            return Err(WorktreeError::NotARepository(self.repo_path.clone()));
        }
        Ok(())
    }

    /// Whether `branch` exists as a local branch.
    pub async fn branch_exists(&self, branch: &str) -> WorktreeResult<bool> {
        let status = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.repo_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    /// Create a worktree for `token` with a fresh `branch`, optionally
    /// forked from `parent` instead of HEAD. Returns the worktree path.
    pub async fn create(
        &self,
        token: &str,
        branch: &str,
        parent: Option<&str>,
    ) -> WorktreeResult<PathBuf> {
        self.ensure_repository().await?;

        let path = self.worktree_path(token);
        if path.exists() {
            return Err(WorktreeError::PathExists(path));
        }
        if self.branch_exists(branch).await? {
            return Err(WorktreeError::BranchExists(branch.to_string()));
        }

        if let Some(parent_dir) = path.parent() {
            tokio::fs::create_dir_all(parent_dir).await?;
        }

        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "add", "-b", branch, path_str.as_str()];
        if let Some(parent) = parent {
            args.push(parent);
        }
        self.run_git(&args).await?;

        debug!(token, branch, path = %path.display(), "created worktree");
        Ok(path)
    }

    /// Remove the worktree for `token` and delete its branch.
    ///
    /// Fails with [`WorktreeError::MissingWorktree`] when nothing exists for
    /// the token; cleanup paths treat that as non-fatal.
    pub async fn remove(&self, token: &str, branch: &str) -> WorktreeResult<()> {
        self.ensure_repository().await?;

        let path = self.worktree_path(token);
        let registered = self
            .list()
            .await
            .map(|worktrees| worktrees.iter().any(|w| w.path == path))
            .unwrap_or(false);

        if !path.exists() && !registered {
            return Err(WorktreeError::MissingWorktree(token.to_string()));
        }

        let path_str = path.to_string_lossy().to_string();
        if let Err(e) = self
            .run_git(&["worktree", "remove", "--force", &path_str])
            .await
        {
            if path.exists() {
                return Err(e);
            }
            // The directory is already gone; drop the stale registration.
            self.run_git(&["worktree", "prune"]).await?;
        }

        // The branch may be checked out elsewhere or already gone.
        if let Err(e) = self.run_git(&["branch", "-D", branch]).await {
            warn!(branch, error = %e, "failed to delete session branch");
        }

        // Sweep anything git left behind.
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }

        debug!(token, branch, "removed worktree");
        Ok(())
    }

    /// List worktrees via `git worktree list --porcelain`.
    pub async fn list(&self) -> WorktreeResult<Vec<WorktreeInfo>> {
        let stdout = self.run_git(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&stdout))
    }
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();

    for block in output.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let mut path = None;
        let mut branch = None;

        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(rest));
            } else if let Some(rest) = line.strip_prefix("branch ") {
                branch = Some(rest.trim_start_matches("refs/heads/").to_string());
            }
        }

        if let Some(path) = path {
            worktrees.push(WorktreeInfo { path, branch });
        }
    }

    worktrees
}

/// Worktree provisioning seam used by the session orchestrator.
///
/// Stateless over `(repository, token, branch)` so one instance serves every
/// project; behind a trait so failure injection in tests doesn't need a real
/// repository.
#[async_trait]
pub trait WorktreeOps: Send + Sync {
    async fn create(
        &self,
        repo: &Path,
        token: &str,
        branch: &str,
        parent: Option<&str>,
    ) -> WorktreeResult<PathBuf>;

    async fn remove(&self, repo: &Path, token: &str, branch: &str) -> WorktreeResult<()>;
}

/// The production [`WorktreeOps`] implementation.
#[derive(Debug, Default, Clone)]
pub struct GitWorktrees;

impl GitWorktrees {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorktreeOps for GitWorktrees {
    async fn create(
        &self,
        repo: &Path,
        token: &str,
        branch: &str,
        parent: Option<&str>,
    ) -> WorktreeResult<PathBuf> {
        WorktreeManager::new(repo).create(token, branch, parent).await
    }

    async fn remove(&self, repo: &Path, token: &str, branch: &str) -> WorktreeResult<()> {
        WorktreeManager::new(repo).remove(token, branch).await
    }
}
