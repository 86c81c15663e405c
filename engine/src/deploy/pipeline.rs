//! Deploy pipeline
//!
//! Turns a source-control push into a running, proxied, supervised
//! application: acquire the per-project lock, parse the pushed
//! manifest, render worker/vhost/supervisor configuration into the
//! project's config repository, reload what the staged diff says must
//! reload, restart the process group, then commit and record the
//! deployment. Any failure between write and commit resets the config
//! repository hard, leaving the previously applied configuration
//! untouched.

use std::sync::Arc;
use std::time::Duration;

use handlebars::Handlebars;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::api::{Clusters, Deployments, Permissions, Projects};
use crate::deploy::lock::DeployLock;
use crate::deploy::state::DeployState;
use crate::errors::EngineError;
use crate::identity::UnixIdentityAllocator;
use crate::models::manifest::{AppManifest, Handler};
use crate::models::{Cluster, DeploymentRecord, Project};
use crate::proxy::ReverseProxyController;
use crate::store::{ConfigLayout, ConfigStore, ExtraFile, WriteOutcome};
use crate::supervisor::ProcessSupervisor;
use crate::workers::WorkerRegistry;

/// File names inside a project's config repository.
const VHOST_CONF: &str = "vhost.conf";
const SUPERVISOR_CONF: &str = "supervisor.conf";

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Fallback vhost domain suffix when neither the manifest nor the
    /// project names one
    pub default_vhost: String,

    /// Age past which a contended lock is reported as stale
    pub lock_stale_after: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            default_vhost: "localhost".to_string(),
            lock_stale_after: Some(Duration::from_secs(1800)),
        }
    }
}

/// One deploy invocation.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub project: String,
    pub cluster: String,
    pub user: String,

    /// Source revision before the push, if the caller knows it
    pub old_rev: Option<String>,

    /// Pushed source revision
    pub new_rev: Option<String>,
}

/// What a deploy run did.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub project: String,
    pub cluster: String,

    /// `Committed` or `Unchanged`
    pub write: WriteOutcome,

    /// Paths that changed in the config repository
    pub changed_paths: Vec<String>,

    pub old_conf_rev: Option<String>,
    pub new_conf_rev: Option<String>,
}

impl DeployOutcome {
    pub fn changed(&self) -> bool {
        !self.changed_paths.is_empty()
    }
}

/// The top-level deploy orchestrator.
///
/// All collaborators arrive as explicit constructor parameters; the
/// pipeline owns no global state.
pub struct DeployPipeline {
    registry: Arc<Handlebars<'static>>,
    layout: ConfigLayout,
    workers: WorkerRegistry,
    projects: Arc<dyn Projects>,
    clusters: Arc<dyn Clusters>,
    deployments: Arc<dyn Deployments>,
    permissions: Arc<dyn Permissions>,
    supervisor: Arc<dyn ProcessSupervisor>,
    proxy: ReverseProxyController,
    identities: UnixIdentityAllocator,
    options: PipelineOptions,
}

impl DeployPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Handlebars<'static>>,
        layout: ConfigLayout,
        workers: WorkerRegistry,
        projects: Arc<dyn Projects>,
        clusters: Arc<dyn Clusters>,
        deployments: Arc<dyn Deployments>,
        permissions: Arc<dyn Permissions>,
        supervisor: Arc<dyn ProcessSupervisor>,
        proxy: ReverseProxyController,
        identities: UnixIdentityAllocator,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            layout,
            workers,
            projects,
            clusters,
            deployments,
            permissions,
            supervisor,
            proxy,
            identities,
            options,
        }
    }

    /// Run one deploy end to end.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, EngineError> {
        let (project, cluster) = self.resolve(&request).await?;

        if !self
            .permissions
            .has(&request.user, "deploy", &project.name)
            .await?
        {
            return Err(EngineError::PermissionDenied(format!(
                "{} may not deploy {}",
                request.user, project.name
            )));
        }

        // Missing manifest fails before the lock is ever taken.
        if !crate::models::project::has_manifest(&project.work_dir) {
            return Err(EngineError::Precondition(format!(
                "project {} is missing its {} file",
                project.name,
                crate::models::project::MANIFEST_FILE
            )));
        }
        let manifest_path = project.manifest_path();

        let _lock = DeployLock::try_acquire(
            &manifest_path,
            &project.name,
            self.options.lock_stale_after,
        )?;
        let mut state = DeployState::Locked;
        info!("Deploying {} to {} for {}", project.name, cluster.name, request.user);

        let manifest = AppManifest::load(&manifest_path).await?;
        let manifest_text = tokio::fs::read_to_string(&manifest_path).await?;

        // Make sure the project owns a unix identity on this cluster
        // tree before anything runs under it.
        let identity = self
            .identities
            .allocate(&project.name, &cluster.name)
            .await?;

        let store = ConfigStore::new(self.layout.project_dir(&project.name));
        let old_conf_rev = store.head().await?;

        let DeployPlan {
            vhost_context,
            mut extras,
            has_workers,
        } = self.plan(&project, &manifest, identity.uid, identity.gid)?;
        extras.push(ExtraFile::literal(
            crate::models::project::MANIFEST_FILE,
            manifest_text,
        ));

        let configurable = self.proxy.vhost_configurable(store.clone(), extras);
        let changed_paths = configurable.stage(&vhost_context).await?;
        state
            .advance(DeployState::ConfigWritten)
            .map_err(EngineError::Internal)?;

        if !changed_paths.is_empty() {
            let diff = store.diff().await.unwrap_or_default();
            // The caller's transcript stays short; the detail is here.
            info!("Config changes for {}:\n{}", project.name, diff);
        }

        let result = self
            .apply(&project, has_workers, &changed_paths, &mut state)
            .await;
        if let Err(err) = result {
            error!("Deployment of {} failed, rolling back: {}", project.name, err);
            store.reset_hard().await?;
            let _ = state.advance(DeployState::RolledBack);
            return Err(EngineError::DeployError(format!(
                "deployment of {} failed: {}",
                project.name, err
            )));
        }

        let message = format!("deploy {} for {}", project.name, request.user);
        let write = match configurable.commit_staged(&message).await {
            Ok(write) => write,
            Err(err) => {
                let _ = state.advance(DeployState::RolledBack);
                return Err(err);
            }
        };
        state
            .advance(DeployState::Committed)
            .map_err(EngineError::Internal)?;

        let new_conf_rev = store.head().await?;
        let record = DeploymentRecord {
            project: project.name.clone(),
            cluster: cluster.name.clone(),
            old_rev: request.old_rev.clone(),
            new_rev: request.new_rev.clone(),
            old_conf_rev: old_conf_rev.clone(),
            new_conf_rev: new_conf_rev.clone(),
            user: request.user.clone(),
            timestamp: chrono::Utc::now(),
            active: true,
        };
        self.deployments.record(record).await?;

        info!(
            "Deployed {} to {} ({} -> {})",
            project.name,
            cluster.name,
            old_conf_rev.as_deref().unwrap_or("none"),
            new_conf_rev.as_deref().unwrap_or("none"),
        );
        Ok(DeployOutcome {
            project: project.name,
            cluster: cluster.name,
            write,
            changed_paths,
            old_conf_rev,
            new_conf_rev,
        })
    }

    /// Render the vhost fragment a deploy would commit, with no I/O.
    pub async fn preview(&self, project: &str, cluster: &str) -> Result<String, EngineError> {
        let (project, cluster) = self
            .resolve(&DeployRequest {
                project: project.to_string(),
                cluster: cluster.to_string(),
                user: String::new(),
                old_rev: None,
                new_rev: None,
            })
            .await?;
        let _ = cluster;

        let manifest = AppManifest::load(&project.manifest_path()).await?;
        let plan = self.plan(&project, &manifest, 0, 0)?;
        let configurable = self
            .proxy
            .vhost_configurable(ConfigStore::new(self.layout.project_dir(&project.name)), vec![]);
        match configurable
            .write(&plan.vhost_context, crate::store::WriteMode::Preview)
            .await?
        {
            WriteOutcome::Preview(content) => Ok(content),
            other => Err(EngineError::Internal(format!(
                "preview produced unexpected outcome {:?}",
                other
            ))),
        }
    }

    async fn resolve(&self, request: &DeployRequest) -> Result<(Project, Cluster), EngineError> {
        let project = self
            .projects
            .get(&request.project)
            .await?
            .ok_or_else(|| {
                EngineError::Precondition(format!("unknown project {}", request.project))
            })?;
        let cluster = self
            .clusters
            .get(&request.cluster)
            .await?
            .ok_or_else(|| {
                EngineError::Precondition(format!("unknown cluster {}", request.cluster))
            })?;
        Ok((project, cluster))
    }

    /// Derive everything the write step needs from the manifest.
    fn plan(
        &self,
        project: &Project,
        manifest: &AppManifest,
        uid: u32,
        gid: u32,
    ) -> Result<DeployPlan, EngineError> {
        let mut sections = Vec::new();
        let mut supervisor_workers = Vec::new();
        let mut program_names = Vec::new();
        let mut extras = Vec::new();
        let mut worker_index = 0usize;

        for handler in &manifest.handlers {
            match handler {
                Handler::Worker(worker) => {
                    let kind = self.workers.get(&worker.kind)?;
                    let name = project.worker_name(worker_index);
                    worker_index += 1;

                    let port = worker.params.get("port").and_then(Value::as_u64);
                    let port = port.unwrap_or(manifest.port as u64);

                    let mut script_context = worker.params.clone();
                    if let Value::Object(map) = &mut script_context {
                        map.insert("name".to_string(), json!(name));
                        map.insert("port".to_string(), json!(port));
                    }

                    let script = kind.script_name(&name);
                    let script_path = self
                        .layout
                        .project_dir(&project.name)
                        .join(&script)
                        .display()
                        .to_string();
                    extras.push(ExtraFile::from_template(
                        script,
                        kind.startup_template(),
                        Some(script_context),
                    ));

                    supervisor_workers.push(json!({
                        "name": name,
                        "command": kind.command(&script_path),
                        "directory": project.work_dir.display().to_string(),
                        "user": project.group,
                        "logfile": self
                            .layout
                            .base_dir
                            .join("log")
                            .join(format!("{}.log", name))
                            .display()
                            .to_string(),
                    }));

                    sections.push(json!({
                        "worker": true,
                        "name": name,
                        "port": port,
                        "url": worker.params.get("url").cloned().unwrap_or(Value::Null),
                    }));
                    program_names.push(name);
                }
                Handler::Passthrough(block) => {
                    sections.push(block.clone());
                }
            }
        }

        // A manifest with no workers is a pure proxy passthrough; no
        // supervisor fragment and no process group exist for it.
        if !program_names.is_empty() {
            extras.push(ExtraFile::from_template(
                SUPERVISOR_CONF,
                "supervisor/project.conf",
                Some(json!({
                    "project": project.name,
                    "programs": program_names.join(","),
                    "workers": supervisor_workers,
                })),
            ));
        }

        let domain = manifest
            .domain
            .clone()
            .unwrap_or_else(|| project.domain_or(&self.options.default_vhost));

        let vhost_context = json!({
            "project": project.name,
            "domain": domain,
            "port": manifest.port,
            "runtime": manifest.runtime,
            "uid": uid,
            "gid": gid,
            "sections": sections,
        });

        Ok(DeployPlan {
            vhost_context,
            extras,
            has_workers: !program_names.is_empty(),
        })
    }

    /// Reload/restart steps between staging and committing. Failures
    /// here trigger the caller's reset_hard.
    async fn apply(
        &self,
        project: &Project,
        has_workers: bool,
        changed_paths: &[String],
        state: &mut DeployState,
    ) -> Result<(), EngineError> {
        if changed_paths.is_empty() {
            info!("No config changes for {}", project.name);
            return Ok(());
        }

        if changed_paths.iter().any(|p| p == VHOST_CONF) {
            self.proxy.reload().await?;
            state
                .advance(DeployState::ProxyReloaded)
                .map_err(EngineError::Internal)?;
        }

        if changed_paths.iter().any(|p| p == SUPERVISOR_CONF) {
            self.supervisor
                .reread_config()
                .await
                .map_err(|e| EngineError::ReloadFailure(e.to_string()))?;
            self.supervisor.add_process_group(&project.name).await?;
            state
                .advance(DeployState::SupervisorReloaded)
                .map_err(EngineError::Internal)?;
        }

        if has_workers {
            self.supervisor
                .restart(&project.name)
                .await
                .map_err(|e| EngineError::ReloadFailure(e.to_string()))?;
            state
                .advance(DeployState::ProcessRestarted)
                .map_err(EngineError::Internal)?;
        }

        Ok(())
    }
}

struct DeployPlan {
    vhost_context: Value,
    extras: Vec<ExtraFile>,
    has_workers: bool,
}
