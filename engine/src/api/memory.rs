//! In-memory collaborator implementations
//!
//! Back the CLI (inventory loaded from the settings file) and the test
//! suite. Real record storage is out of scope for the engine.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::api::{Clusters, Deployments, Permissions, Projects};
use crate::errors::EngineError;
use crate::models::{Cluster, DeploymentRecord, Project};

/// Fixed project directory.
#[derive(Debug, Default)]
pub struct MemoryProjects {
    projects: HashMap<String, Project>,
}

impl MemoryProjects {
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: projects.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl Projects for MemoryProjects {
    async fn get(&self, name: &str) -> Result<Option<Project>, EngineError> {
        Ok(self.projects.get(name).cloned())
    }
}

/// Fixed cluster directory.
#[derive(Debug, Default)]
pub struct MemoryClusters {
    clusters: HashMap<String, Cluster>,
}

impl MemoryClusters {
    pub fn new(clusters: impl IntoIterator<Item = Cluster>) -> Self {
        Self {
            clusters: clusters.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }
}

#[async_trait]
impl Clusters for MemoryClusters {
    async fn get(&self, name: &str) -> Result<Option<Cluster>, EngineError> {
        Ok(self.clusters.get(name).cloned())
    }
}

/// Append-only deployment trail with the active-flag invariant.
#[derive(Debug, Default)]
pub struct MemoryDeployments {
    records: RwLock<Vec<DeploymentRecord>>,
}

impl MemoryDeployments {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded deployments, oldest first.
    pub async fn all(&self) -> Vec<DeploymentRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl Deployments for MemoryDeployments {
    async fn record(&self, record: DeploymentRecord) -> Result<(), EngineError> {
        let mut records = self.records.write().await;
        for existing in records.iter_mut() {
            if existing.project == record.project && existing.cluster == record.cluster {
                existing.active = false;
            }
        }
        records.push(record);
        Ok(())
    }

    async fn active(
        &self,
        project: &str,
        cluster: &str,
    ) -> Result<Option<DeploymentRecord>, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.project == project && r.cluster == cluster && r.active)
            .cloned())
    }
}

/// Grant-list permission checker.
#[derive(Debug, Default)]
pub struct MemoryPermissions {
    allow_all: bool,
    grants: HashSet<(String, String, String)>,
}

impl MemoryPermissions {
    /// Permit everything; the CLI's single-operator mode.
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            grants: HashSet::new(),
        }
    }

    pub fn with_grant(mut self, user: &str, action: &str, target: &str) -> Self {
        self.grants
            .insert((user.to_string(), action.to_string(), target.to_string()));
        self
    }
}

#[async_trait]
impl Permissions for MemoryPermissions {
    async fn has(&self, user: &str, action: &str, target: &str) -> Result<bool, EngineError> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(self
            .grants
            .contains(&(user.to_string(), action.to_string(), target.to_string())))
    }
}
