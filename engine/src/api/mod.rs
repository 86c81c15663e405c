//! Collaborator interfaces
//!
//! The engine consumes project/cluster/deployment/permission records
//! through these traits only; the web front end and its storage layers
//! live elsewhere. The pipeline takes its collaborators as explicit
//! constructor parameters, and every lookup returns an `Option` instead
//! of signalling "not found" through errors.

pub mod memory;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::models::{Cluster, DeploymentRecord, Project};

/// Read access to project records.
#[async_trait]
pub trait Projects: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Project>, EngineError>;
}

/// Read access to cluster records.
#[async_trait]
pub trait Clusters: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Cluster>, EngineError>;

    /// Resolve the root of `name`'s cluster tree by walking parent
    /// links. The root owns the authoritative uid/gid range.
    async fn root(&self, name: &str) -> Result<Option<Cluster>, EngineError> {
        let mut current = match self.get(name).await? {
            Some(cluster) => cluster,
            None => return Ok(None),
        };
        // Parent links form a tree; a bounded walk guards against a
        // misconfigured cycle.
        for _ in 0..32 {
            let parent = match current.parent.clone() {
                None => return Ok(Some(current)),
                Some(parent) => parent,
            };
            let child = current.name.clone();
            current = self.get(&parent).await?.ok_or_else(|| {
                EngineError::ConfigError(format!(
                    "cluster {} names missing parent {}",
                    child, parent
                ))
            })?;
        }
        Err(EngineError::ConfigError(format!(
            "cluster parent chain too deep starting at {}",
            name
        )))
    }
}

/// Write access to the deployment audit trail.
#[async_trait]
pub trait Deployments: Send + Sync {
    /// Record a deployment, deactivating the prior active record for
    /// the same (project, cluster) pair.
    async fn record(&self, record: DeploymentRecord) -> Result<(), EngineError>;

    /// Current active deployment for the pair, if any.
    async fn active(&self, project: &str, cluster: &str)
        -> Result<Option<DeploymentRecord>, EngineError>;
}

/// Permission checks.
#[async_trait]
pub trait Permissions: Send + Sync {
    async fn has(&self, user: &str, action: &str, target: &str) -> Result<bool, EngineError>;
}
