//! Deployment audit model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One (project, cluster) binding with its audit trail.
///
/// At most one record per pair is active at a time; recording a new one
/// deactivates the prior active record first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub project: String,
    pub cluster: String,

    /// Source revision before and after the deploy
    pub old_rev: Option<String>,
    pub new_rev: Option<String>,

    /// Config repository revision before and after the deploy
    pub old_conf_rev: Option<String>,
    pub new_conf_rev: Option<String>,

    /// User who triggered the deploy
    pub user: String,

    pub timestamp: DateTime<Utc>,

    /// Whether this is the live deployment for the pair
    pub active: bool,
}

impl DeploymentRecord {
    pub fn new(project: impl Into<String>, cluster: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            cluster: cluster.into(),
            old_rev: None,
            new_rev: None,
            old_conf_rev: None,
            new_conf_rev: None,
            user: user.into(),
            timestamp: Utc::now(),
            active: true,
        }
    }
}
