//! Application wiring
//!
//! Builds the deploy pipeline and its collaborators out of loaded
//! settings. The CLI is the only consumer; embedders wire
//! `DeployPipeline` themselves.

pub mod options;
pub mod settings;

pub use options::{EngineOptions, ProxyOptions, SupervisorOptions};
pub use settings::Settings;

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::api::memory::{MemoryClusters, MemoryDeployments, MemoryPermissions, MemoryProjects};
use crate::deploy::DeployPipeline;
use crate::errors::EngineError;
use crate::identity::{MemoryIdentityStore, UnixIdentityAllocator};
use crate::proxy::ReverseProxyController;
use crate::store::templates::default_registry;
use crate::store::{ConfigStore, Configurable, WriteMode};
use crate::supervisor::SupervisorClient;
use crate::workers::WorkerRegistry;

/// A fully wired engine.
pub struct Engine {
    pub pipeline: DeployPipeline,
    pub deployments: Arc<MemoryDeployments>,
    pub identities: UnixIdentityAllocator,
}

/// Wire an engine from settings.
///
/// Project and cluster inventories come from the settings file; the
/// deployment trail and identity reservations live in memory for the
/// life of the process.
pub fn build(settings: &Settings) -> Result<Engine, EngineError> {
    let options = settings.engine_options();

    let registry = Arc::new(default_registry());
    let projects = Arc::new(MemoryProjects::new(settings.projects.clone()));
    let clusters = Arc::new(MemoryClusters::new(settings.clusters.clone()));
    let deployments = Arc::new(MemoryDeployments::new());
    let permissions = Arc::new(MemoryPermissions::allow_all());

    let supervisor = Arc::new(SupervisorClient::new(
        &options.supervisor.endpoint,
        options.supervisor.credentials(),
    )?);

    let proxy = ReverseProxyController::new(
        Arc::clone(&registry),
        options.proxy.name.clone(),
        options.proxy.control.clone(),
        supervisor.clone(),
    );

    let identity_store = Arc::new(MemoryIdentityStore::new());
    let identities = UnixIdentityAllocator::new(identity_store.clone(), clusters.clone());

    let pipeline = DeployPipeline::new(
        registry,
        options.layout.clone(),
        WorkerRegistry::builtin(),
        projects,
        clusters.clone(),
        deployments.clone(),
        permissions,
        supervisor,
        proxy,
        UnixIdentityAllocator::new(identity_store, clusters),
        options.pipeline.clone(),
    );

    Ok(Engine {
        pipeline,
        deployments,
        identities,
    })
}

/// Set up the configuration tree and write the proxy and supervisor
/// main configuration files.
///
/// Run once when a host is taken into service; both files are under
/// version control like everything else, so re-running commits nothing
/// when they are already current.
pub async fn initialize(settings: &Settings) -> Result<(), EngineError> {
    let options = settings.engine_options();
    let registry = Arc::new(default_registry());

    options.layout.setup().await?;
    let base = options.layout.base_dir.display().to_string();

    let proxy = ReverseProxyController::new(
        Arc::clone(&registry),
        options.proxy.name.clone(),
        options.proxy.control.clone(),
        Arc::new(SupervisorClient::new(
            &options.supervisor.endpoint,
            options.supervisor.credentials(),
        )?),
    );
    let outcome = proxy
        .write_main_conf(
            ConfigStore::new(options.layout.proxy_dir()),
            &json!({ "user": options.proxy.user, "base": base }),
            WriteMode::Commit {
                message: "initialize proxy configuration".to_string(),
            },
        )
        .await?;
    info!("Proxy main configuration: {:?}", outcome);

    let supervisor_conf = Configurable::new(
        registry,
        ConfigStore::new(options.layout.supervisor_dir()),
        "supervisor",
        "supervisor.conf",
        "supervisor.conf",
    );
    let outcome = supervisor_conf
        .write(
            &json!({ "base": base }),
            WriteMode::Commit {
                message: "initialize supervisor configuration".to_string(),
            },
        )
        .await?;
    info!("Supervisor main configuration: {:?}", outcome);

    Ok(())
}
