//! Project model

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the manifest file pushed with every project.
pub const MANIFEST_FILE: &str = "app.yaml";

/// A deployable application.
///
/// Owned by a group; the group name doubles as the unix account the
/// project's processes run under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project name, unique within its group
    pub name: String,

    /// Owning group
    pub group: String,

    /// Source repository location
    pub repo: String,

    /// Bare repository directory on the control node
    pub repo_dir: PathBuf,

    /// Checked-out working directory (where app.yaml lives after a push)
    pub work_dir: PathBuf,

    /// Domain to serve the project on when the manifest does not name one
    #[serde(default)]
    pub default_domain: Option<String>,
}

impl Project {
    /// Path of the pushed application manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join(MANIFEST_FILE)
    }

    /// Domain used when the manifest omits one.
    pub fn domain_or(&self, fallback: &str) -> String {
        self.default_domain
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.name, fallback))
    }

    /// Generated name for the worker at the given manifest position.
    ///
    /// Stable across deploys so identical manifests regenerate identical
    /// process and file names.
    pub fn worker_name(&self, position: usize) -> String {
        format!("{}_{}", self.name, position)
    }
}

/// True if the path looks like a pushed project working directory.
pub fn has_manifest(work_dir: &Path) -> bool {
    work_dir.join(MANIFEST_FILE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            name: "app".to_string(),
            group: "web".to_string(),
            repo: "git@example.com:web/app.git".to_string(),
            repo_dir: PathBuf::from("/srv/repos/app.git"),
            work_dir: PathBuf::from("/srv/work/app"),
            default_domain: None,
        }
    }

    #[test]
    fn worker_names_are_stable() {
        let p = project();
        assert_eq!(p.worker_name(0), "app_0");
        assert_eq!(p.worker_name(1), "app_1");
    }

    #[test]
    fn domain_falls_back_to_project_name() {
        let p = project();
        assert_eq!(p.domain_or("example.net"), "app.example.net");

        let mut named = project();
        named.default_domain = Some("app.example.com".to_string());
        assert_eq!(named.domain_or("example.net"), "app.example.com");
    }
}
