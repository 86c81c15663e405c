//! Deploy pipeline integration tests
//!
//! Drive the full pipeline against a real git-backed config tree in a
//! temporary directory, with a recording supervisor standing in for the
//! daemon.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use dockhand::api::memory::{MemoryClusters, MemoryDeployments, MemoryPermissions, MemoryProjects};
use dockhand::api::Deployments;
use dockhand::deploy::{DeployLock, DeployPipeline, DeployRequest, PipelineOptions};
use dockhand::errors::EngineError;
use dockhand::identity::{MemoryIdentityStore, UnixIdentityAllocator};
use dockhand::models::{Cluster, Project};
use dockhand::proxy::{ProxyControl, ReverseProxyController};
use dockhand::store::templates::default_registry;
use dockhand::store::{ConfigLayout, WriteOutcome};
use dockhand::supervisor::ProcessSupervisor;
use dockhand::workers::WorkerRegistry;

#[derive(Default)]
struct RecordingSupervisor {
    rereads: AtomicUsize,
    groups_added: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_reread: AtomicBool,
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn reread_config(&self) -> Result<(), EngineError> {
        if self.fail_reread.load(Ordering::SeqCst) {
            return Err(EngineError::SupervisorError(
                "control socket went away".to_string(),
            ));
        }
        self.rereads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_process_group(&self, _name: &str) -> Result<(), EngineError> {
        self.groups_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _name: &str) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _name: &str) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    _tmp: TempDir,
    layout: ConfigLayout,
    work_dir: PathBuf,
    pipeline: DeployPipeline,
    deployments: Arc<MemoryDeployments>,
    supervisor: Arc<RecordingSupervisor>,
}

const MANIFEST: &str = "\
domain: app.example.com
port: 8080
handlers:
  - worker: wsgi
    port: 8080
";

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("work/app");
    std::fs::create_dir_all(&work_dir).unwrap();

    let layout = ConfigLayout::new(tmp.path().join("state"));
    let registry = Arc::new(default_registry());
    let supervisor = Arc::new(RecordingSupervisor::default());

    let project = Project {
        name: "app".to_string(),
        group: "web".to_string(),
        repo: "git@example.com:web/app.git".to_string(),
        repo_dir: tmp.path().join("repos/app.git"),
        work_dir: work_dir.clone(),
        default_domain: None,
    };
    let cluster = Cluster {
        name: "prod".to_string(),
        parent: None,
        min_uid: 10_000,
        max_uid: 10_999,
        min_gid: 20_000,
        max_gid: 20_999,
    };

    let clusters = Arc::new(MemoryClusters::new([cluster]));
    let deployments = Arc::new(MemoryDeployments::new());
    let proxy = ReverseProxyController::new(
        Arc::clone(&registry),
        "nginx",
        ProxyControl::Command {
            reload: "true".to_string(),
            start: "true".to_string(),
            stop: "true".to_string(),
        },
        supervisor.clone(),
    );

    let pipeline = DeployPipeline::new(
        registry,
        layout.clone(),
        WorkerRegistry::builtin(),
        Arc::new(MemoryProjects::new([project])),
        clusters.clone(),
        deployments.clone(),
        Arc::new(MemoryPermissions::allow_all()),
        supervisor.clone(),
        proxy,
        UnixIdentityAllocator::new(Arc::new(MemoryIdentityStore::new()), clusters),
        PipelineOptions::default(),
    );

    Harness {
        _tmp: tmp,
        layout,
        work_dir,
        pipeline,
        deployments,
        supervisor,
    }
}

fn write_manifest(harness: &Harness, text: &str) {
    std::fs::write(harness.work_dir.join("app.yaml"), text).unwrap();
}

fn request() -> DeployRequest {
    DeployRequest {
        project: "app".to_string(),
        cluster: "prod".to_string(),
        user: "alice".to_string(),
        old_rev: Some("aaa111".to_string()),
        new_rev: Some("bbb222".to_string()),
    }
}

#[tokio::test]
async fn deploy_one_worker_project_end_to_end() {
    let h = harness();
    write_manifest(&h, MANIFEST);

    let outcome = h.pipeline.deploy(request()).await.unwrap();

    assert!(matches!(outcome.write, WriteOutcome::Committed { .. }));
    assert!(outcome.changed());
    assert!(outcome.old_conf_rev.is_none());
    assert!(outcome.new_conf_rev.is_some());

    let dir = h.layout.project_dir("app");
    let vhost = std::fs::read_to_string(dir.join("vhost.conf")).unwrap();
    assert!(vhost.contains("server_name app.example.com;"));
    assert!(vhost.contains("proxy_pass http://127.0.0.1:8080;"));

    let fragment = std::fs::read_to_string(dir.join("supervisor.conf")).unwrap();
    assert!(fragment.contains("[program:app_0]"));
    assert!(fragment.contains("programs=app_0"));

    // The pushed manifest is committed alongside the rendered files.
    assert_eq!(std::fs::read_to_string(dir.join("app.yaml")).unwrap(), MANIFEST);
    assert!(dir.join("app_0.py").is_file());

    // Supervisor saw one reread, one group add and one restart.
    assert_eq!(h.supervisor.rereads.load(Ordering::SeqCst), 1);
    assert_eq!(h.supervisor.groups_added.load(Ordering::SeqCst), 1);
    assert_eq!(h.supervisor.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.supervisor.starts.load(Ordering::SeqCst), 1);

    let record = h.deployments.active("app", "prod").await.unwrap().unwrap();
    assert_eq!(record.user, "alice");
    assert_eq!(record.new_rev.as_deref(), Some("bbb222"));
    assert_eq!(record.new_conf_rev, outcome.new_conf_rev);
}

#[tokio::test]
async fn identical_redeploy_changes_nothing_and_touches_nothing() {
    let h = harness();
    write_manifest(&h, MANIFEST);

    h.pipeline.deploy(request()).await.unwrap();
    let rereads_after_first = h.supervisor.rereads.load(Ordering::SeqCst);
    let starts_after_first = h.supervisor.starts.load(Ordering::SeqCst);
    let head_after_first = h
        .deployments
        .active("app", "prod")
        .await
        .unwrap()
        .unwrap()
        .new_conf_rev;

    let second = h.pipeline.deploy(request()).await.unwrap();

    assert_eq!(second.write, WriteOutcome::Unchanged);
    assert!(!second.changed());
    assert_eq!(second.old_conf_rev, head_after_first);
    assert_eq!(second.new_conf_rev, head_after_first);
    assert_eq!(h.supervisor.rereads.load(Ordering::SeqCst), rereads_after_first);
    assert_eq!(h.supervisor.starts.load(Ordering::SeqCst), starts_after_first);

    // The no-op run is still recorded and becomes the active deployment.
    let all = h.deployments.all().await;
    assert_eq!(all.len(), 2);
    assert!(!all[0].active);
    assert!(all[1].active);
}

#[tokio::test]
async fn supervisor_failure_rolls_the_config_back() {
    let h = harness();
    write_manifest(&h, MANIFEST);
    h.supervisor.fail_reread.store(true, Ordering::SeqCst);

    let err = h.pipeline.deploy(request()).await.unwrap_err();
    assert!(matches!(err, EngineError::DeployError(_)));

    // Nothing staged survives, nothing is recorded.
    let dir = h.layout.project_dir("app");
    assert!(!dir.join("vhost.conf").exists());
    assert!(!dir.join("supervisor.conf").exists());
    assert!(h.deployments.all().await.is_empty());

    // The failure is transient; a clean retry succeeds.
    h.supervisor.fail_reread.store(false, Ordering::SeqCst);
    let outcome = h.pipeline.deploy(request()).await.unwrap();
    assert!(matches!(outcome.write, WriteOutcome::Committed { .. }));
}

#[tokio::test]
async fn missing_manifest_fails_before_any_side_effect() {
    let h = harness();

    let err = h.pipeline.deploy(request()).await.unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)));

    assert!(!h.layout.project_dir("app").exists());
    assert!(h.deployments.all().await.is_empty());
    assert_eq!(h.supervisor.rereads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_deploys_of_one_project_are_rejected() {
    let h = harness();
    write_manifest(&h, MANIFEST);

    let held = DeployLock::try_acquire(&h.work_dir.join("app.yaml"), "app", None).unwrap();
    let err = h.pipeline.deploy(request()).await.unwrap_err();
    assert!(matches!(err, EngineError::LockBusy(_)));
    drop(held);

    let outcome = h.pipeline.deploy(request()).await.unwrap();
    assert!(matches!(outcome.write, WriteOutcome::Committed { .. }));
}

#[tokio::test]
async fn preview_renders_the_vhost_without_io() {
    let h = harness();
    write_manifest(&h, MANIFEST);

    let rendered = h.pipeline.preview("app", "prod").await.unwrap();
    assert!(rendered.contains("server_name app.example.com;"));
    assert!(rendered.contains("proxy_pass http://127.0.0.1:8080;"));
    assert!(!h.layout.project_dir("app").join(".git").exists());
}

#[tokio::test]
async fn initialize_writes_the_main_configurations() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("state");
    let settings =
        dockhand::app::Settings::parse(&format!("base_dir: {}\n", base.display())).unwrap();

    dockhand::app::initialize(&settings).await.unwrap();

    let nginx = std::fs::read_to_string(base.join("proxy/nginx.conf")).unwrap();
    assert!(nginx.contains("user www-data;"));
    assert!(nginx.contains(&format!("include {}/config/*/vhost.conf;", base.display())));

    let supervisor = std::fs::read_to_string(base.join("supervisor/supervisor.conf")).unwrap();
    assert!(supervisor.contains("[supervisord]"));
    assert!(supervisor.contains(&format!("files = {}/config/*/supervisor.conf", base.display())));

    // Re-running against an unchanged tree commits nothing new.
    dockhand::app::initialize(&settings).await.unwrap();
}

#[tokio::test]
async fn passthrough_only_manifest_skips_the_supervisor() {
    let h = harness();
    write_manifest(
        &h,
        "domain: static.example.com\nhandlers:\n  - url: /\n    path: /srv/static\n",
    );

    let outcome = h.pipeline.deploy(request()).await.unwrap();
    assert!(matches!(outcome.write, WriteOutcome::Committed { .. }));

    let dir = h.layout.project_dir("app");
    assert!(dir.join("vhost.conf").is_file());
    assert!(!dir.join("supervisor.conf").exists());

    // No workers: no reread, no group, no restart.
    assert_eq!(h.supervisor.rereads.load(Ordering::SeqCst), 0);
    assert_eq!(h.supervisor.groups_added.load(Ordering::SeqCst), 0);
    assert_eq!(h.supervisor.starts.load(Ordering::SeqCst), 0);
}
