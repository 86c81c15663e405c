//! Domain models

pub mod cluster;
pub mod deployment;
pub mod manifest;
pub mod project;

pub use cluster::Cluster;
pub use deployment::DeploymentRecord;
pub use manifest::{AppManifest, Handler, WorkerHandler};
pub use project::Project;
