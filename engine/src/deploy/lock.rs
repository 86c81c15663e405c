//! Per-project deploy lock
//!
//! Deploys are triggered by source-control pushes, which can arrive
//! concurrently for the same project. An advisory exclusive lock on the
//! project's manifest file serializes the config-write-through-restart
//! critical section. Acquisition never waits: a contended lock fails
//! fast so the pusher sees "another deployment is in progress" instead
//! of queueing.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::errors::EngineError;

/// An acquired deploy lock. Released on drop, so the lock is freed on
/// every exit path of the critical section.
pub struct DeployLock {
    _flock: Flock<File>,
    path: PathBuf,
}

// Manual impl: `Flock<File>` has no `Debug`.
impl fmt::Debug for DeployLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployLock").field("path", &self.path).finish()
    }
}

impl DeployLock {
    /// Try to take the exclusive lock on `path` for `project`.
    ///
    /// Returns `LockBusy` immediately when another holder exists.
    /// `stale_after` is consulted for stale-lock *detection* only: a
    /// busy lock whose file hasn't been touched within the window is
    /// reported in the logs as possibly abandoned, but never broken
    /// here; that is left to operator intervention.
    pub fn try_acquire(
        path: &Path,
        project: &str,
        stale_after: Option<Duration>,
    ) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| {
            EngineError::Precondition(format!("cannot open lock file {}: {}", path.display(), e))
        })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                debug!("Acquired deploy lock for {} at {}", project, path.display());
                Ok(Self {
                    _flock: flock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, _errno)) => {
                if let Some(window) = stale_after {
                    if is_stale(path, window) {
                        warn!(
                            "Deploy lock for {} at {} looks abandoned (older than {:?}); \
                             not breaking it, operator intervention required",
                            project,
                            path.display(),
                            window
                        );
                    }
                }
                Err(EngineError::LockBusy(project.to_string()))
            }
        }
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_stale(path: &Path, window: Duration) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(mtime) {
        Ok(age) => age > window,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_file() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.yaml");
        std::fs::write(&path, "handlers: []\n").unwrap();
        (tmp, path)
    }

    #[test]
    fn second_acquire_is_busy_while_held() {
        let (_tmp, path) = lock_file();

        let held = DeployLock::try_acquire(&path, "app", None).unwrap();
        assert!(format!("{:?}", held).contains("app.yaml"));

        let err = DeployLock::try_acquire(&path, "app", None).unwrap_err();
        assert!(matches!(err, EngineError::LockBusy(_)));

        drop(held);
        DeployLock::try_acquire(&path, "app", None).unwrap();
    }

    #[test]
    fn missing_lock_file_is_a_precondition_failure() {
        let tmp = TempDir::new().unwrap();
        let err =
            DeployLock::try_acquire(&tmp.path().join("missing.yaml"), "app", None).unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
    }

    #[test]
    fn stale_window_does_not_break_the_lock() {
        let (_tmp, path) = lock_file();
        let _held = DeployLock::try_acquire(&path, "app", None).unwrap();

        let err =
            DeployLock::try_acquire(&path, "app", Some(Duration::from_secs(0))).unwrap_err();
        assert!(matches!(err, EngineError::LockBusy(_)));
    }
}
