//! Configuration storage layout

use std::path::PathBuf;

use tokio::fs;

use crate::errors::EngineError;

/// On-disk layout of the generated-configuration tree.
///
/// Each of `proxy/`, `supervisor/` and `config/<project>/` is a
/// separately version-controlled directory.
#[derive(Debug, Clone)]
pub struct ConfigLayout {
    /// Base directory for all generated configuration
    pub base_dir: PathBuf,
}

impl ConfigLayout {
    /// Create a new layout rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the proxy configuration directory
    pub fn proxy_dir(&self) -> PathBuf {
        self.base_dir.join("proxy")
    }

    /// Get the process-supervisor configuration directory
    pub fn supervisor_dir(&self) -> PathBuf {
        self.base_dir.join("supervisor")
    }

    /// Get a project's configuration directory
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.base_dir.join("config").join(project)
    }

    /// Setup the layout (create directories)
    pub async fn setup(&self) -> Result<(), EngineError> {
        fs::create_dir_all(self.proxy_dir()).await?;
        fs::create_dir_all(self.supervisor_dir()).await?;
        fs::create_dir_all(self.base_dir.join("config")).await?;
        Ok(())
    }
}

impl Default for ConfigLayout {
    fn default() -> Self {
        Self::new("/var/lib/dockhand")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_dirs_are_isolated() {
        let layout = ConfigLayout::new("/tmp/base");
        assert_eq!(
            layout.project_dir("app"),
            PathBuf::from("/tmp/base/config/app")
        );
        assert_ne!(layout.project_dir("app"), layout.project_dir("other"));
        assert_eq!(layout.proxy_dir(), PathBuf::from("/tmp/base/proxy"));
        assert_eq!(layout.supervisor_dir(), PathBuf::from("/tmp/base/supervisor"));
    }
}
