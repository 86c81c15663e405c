//! Error types for the deployment engine

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] handlebars::RenderError),

    /// Missing manifest, unknown project/cluster, unknown worker kind.
    /// Fatal, never retried, raised before any state is touched.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Another pipeline instance holds the per-project lock. Fatal for
    /// this invocation; the caller may simply push again.
    #[error("Another deployment is in progress for {0}")]
    LockBusy(String),

    /// The cluster's configured uid/gid range has no free pair left.
    /// Requires operator intervention (range reconfiguration).
    #[error("Unix ID out of range: {0}")]
    RangeExhausted(String),

    /// Proxy or supervisor refused a reload/restart. The config
    /// repository has already been reset hard when this surfaces.
    #[error("Reload failed: {0}")]
    ReloadFailure(String),

    #[error("Commit failed: {0}")]
    CommitFailure(String),

    #[error("Version control error: {0}")]
    StoreError(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    #[error("Supervisor fault {code}: {message}")]
    SupervisorFault { code: i32, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Manifest error: {0}")]
    ManifestError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
