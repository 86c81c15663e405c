//! Git-backed configuration store
//!
//! Generated configuration lives in per-domain directories, each its own
//! git repository, so every change can be audited and rolled back.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::EngineError;

/// Transactional wrapper over one version-controlled directory.
///
/// Callers follow a stage + diff + commit-or-reset cycle; the working
/// tree is never left with uncommitted tracked changes after a pipeline
/// run.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Create a store handle for `dir`. No I/O happens until `init`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the directory is already under version control.
    pub fn is_initialized(&self) -> bool {
        self.dir.join(".git").is_dir()
    }

    /// Create the directory and initialize version control. Idempotent.
    ///
    /// Seeds an empty initial commit so HEAD always resolves and
    /// `reset_hard`/`diff` behave uniformly on a fresh store.
    pub async fn init(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).await?;
        if self.is_initialized() {
            return Ok(());
        }
        self.run(&["init"]).await?;
        // Commits must succeed unattended, without a global git identity.
        self.run(&["config", "user.name", "dockhand"]).await?;
        self.run(&["config", "user.email", "dockhand@localhost"]).await?;
        self.run(&["commit", "--allow-empty", "-m", "initialize config repository"])
            .await?;
        debug!("Initialized config store at {}", self.dir.display());
        Ok(())
    }

    /// Stage every change in the working tree.
    pub async fn stage_all(&self) -> Result<(), EngineError> {
        self.run(&["add", "--all"]).await?;
        Ok(())
    }

    /// Paths with staged or unstaged changes, porcelain order.
    pub async fn status(&self) -> Result<Vec<String>, EngineError> {
        let out = self.run(&["status", "--porcelain"]).await?;
        Ok(out
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| line[3..].trim().to_string())
            .collect())
    }

    /// Textual diff of the working tree and index against HEAD.
    pub async fn diff(&self) -> Result<String, EngineError> {
        self.run(&["diff", "HEAD"]).await
    }

    /// Commit staged changes. Only called after `stage_all`.
    pub async fn commit(&self, message: &str) -> Result<(), EngineError> {
        self.run(&["commit", "-m", message])
            .await
            .map_err(|e| EngineError::CommitFailure(e.to_string()))?;
        Ok(())
    }

    /// Discard all uncommitted changes, staged or not, including new
    /// untracked files. Restores the tree to exactly the last commit.
    pub async fn reset_hard(&self) -> Result<(), EngineError> {
        self.run(&["reset", "--hard"]).await?;
        self.run(&["clean", "-fd"]).await?;
        warn!("Reset config store at {}", self.dir.display());
        Ok(())
    }

    /// Current revision identifier, if any commit exists.
    pub async fn head(&self) -> Result<Option<String>, EngineError> {
        match self.run(&["rev-parse", "HEAD"]).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        debug!("git {} (in {})", args.join(" "), self.dir.display());
        let output = Command::new("git")
            .current_dir(&self.dir)
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::StoreError(format!("failed to run git: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EngineError::StoreError(format!(
                "git {} failed: {}{}",
                args.first().unwrap_or(&""),
                stderr.trim(),
                stdout.trim()
            )))
        }
    }
}
