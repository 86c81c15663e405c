//! Deployment module

pub mod lock;
pub mod pipeline;
pub mod state;

pub use lock::DeployLock;
pub use pipeline::{DeployOutcome, DeployPipeline, DeployRequest, PipelineOptions};
pub use state::DeployState;
