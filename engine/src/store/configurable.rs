//! Template-driven configuration writing
//!
//! A `Configurable` renders a main configuration file plus a set of
//! extra files into one version-controlled directory, and drives the
//! store through an initialize → write → diff → commit-or-reset
//! protocol. The same renderer backs `--dry-run` previews, "show me the
//! diff" output and actual deploy commits.

use std::path::Path;
use std::sync::Arc;

use handlebars::Handlebars;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, error};

use crate::errors::EngineError;
use crate::store::git::ConfigStore;

/// How `write` treats the rendered output.
#[derive(Debug, Clone)]
pub enum WriteMode {
    /// Return rendered main-file content only, no I/O
    Preview,

    /// Render everything and report what would change, writing nothing
    DryRun,

    /// Write, stage and commit (or report no changes)
    Commit { message: String },
}

/// Result of a `write` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Rendered main-file content (`Preview` mode)
    Preview(String),

    /// Files that would be created or modified (`DryRun` mode)
    DryRun {
        new: Vec<String>,
        changed: Vec<String>,
    },

    /// Changes were committed at this revision
    Committed { revision: String },

    /// Nothing differed from the last commit
    Unchanged,
}

impl WriteOutcome {
    /// True when the call found differences against the last commit.
    pub fn has_changes(&self) -> bool {
        match self {
            WriteOutcome::Preview(_) => false,
            WriteOutcome::DryRun { new, changed } => !new.is_empty() || !changed.is_empty(),
            WriteOutcome::Committed { .. } => true,
            WriteOutcome::Unchanged => false,
        }
    }
}

/// Content source for an extra file.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Render the named template (relative names resolve against the
    /// configurable's template base)
    Template(String),

    /// Verbatim content, e.g. a copy of the pushed manifest
    Literal(String),
}

/// An extra file written alongside the main configuration file.
#[derive(Debug, Clone)]
pub struct ExtraFile {
    /// File name inside the target directory
    pub name: String,

    pub source: FileSource,

    /// Context override; the main context is used when absent
    pub context: Option<Value>,
}

impl ExtraFile {
    pub fn from_template(name: impl Into<String>, template: impl Into<String>, context: Option<Value>) -> Self {
        Self {
            name: name.into(),
            source: FileSource::Template(template.into()),
            context,
        }
    }

    pub fn literal(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: FileSource::Literal(content.into()),
            context: None,
        }
    }
}

enum FileChange {
    New,
    Changed,
    Unchanged,
}

/// Renders templates into one config store directory.
pub struct Configurable {
    registry: Arc<Handlebars<'static>>,
    store: ConfigStore,
    template_base: String,
    main_file: String,
    main_template: String,
    extra_files: Vec<ExtraFile>,
}

impl Configurable {
    pub fn new(
        registry: Arc<Handlebars<'static>>,
        store: ConfigStore,
        template_base: impl Into<String>,
        main_file: impl Into<String>,
        main_template: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            template_base: template_base.into(),
            main_file: main_file.into(),
            main_template: main_template.into(),
            extra_files: Vec::new(),
        }
    }

    pub fn with_extra_files(mut self, files: Vec<ExtraFile>) -> Self {
        self.extra_files = files;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Render a template with the given context.
    ///
    /// A template missing from the registry renders as the empty string
    /// so target types that don't need every file keep working.
    pub fn render(&self, template: &str, context: &Value) -> Result<String, EngineError> {
        match self.render_opt(template, context)? {
            Some(text) => Ok(text),
            None => Ok(String::new()),
        }
    }

    fn render_opt(&self, template: &str, context: &Value) -> Result<Option<String>, EngineError> {
        let name = if template.contains('/') {
            template.to_string()
        } else {
            format!("{}/{}", self.template_base, template)
        };
        if !self.registry.has_template(&name) {
            debug!("Template {} not registered, rendering nothing", name);
            return Ok(None);
        }
        Ok(Some(self.registry.render(&name, context)?))
    }

    /// Render and write per the mode contract.
    pub async fn write(&self, context: &Value, mode: WriteMode) -> Result<WriteOutcome, EngineError> {
        match mode {
            WriteMode::Preview => {
                let content = self.render(&self.main_template, context)?;
                Ok(WriteOutcome::Preview(content))
            }
            WriteMode::DryRun => self.write_dry_run(context).await,
            WriteMode::Commit { message } => self.write_commit(context, &message).await,
        }
    }

    /// Compare rendered content against what is on disk, touching
    /// nothing. Pre-existing files stay exactly as found, versioned or
    /// not.
    async fn write_dry_run(&self, context: &Value) -> Result<WriteOutcome, EngineError> {
        let mut changes = Vec::new();
        for (name, content) in self.render_files(context)? {
            let change = compare_existing(self.store.dir(), &name, &content).await;
            changes.push((name, change));
        }
        let (new, changed) = split_changes(&changes);
        Ok(WriteOutcome::DryRun { new, changed })
    }

    async fn write_commit(&self, context: &Value, message: &str) -> Result<WriteOutcome, EngineError> {
        self.stage(context).await?;
        self.commit_staged(message).await
    }

    /// First half of commit mode: initialize if needed, write all
    /// files, stage them and return the changed paths.
    ///
    /// Callers that must act between write and commit (the deploy
    /// pipeline reloads the proxy and supervisor off the staged diff)
    /// use this with `commit_staged`, resetting hard themselves if
    /// anything in between fails.
    pub async fn stage(&self, context: &Value) -> Result<Vec<String>, EngineError> {
        self.store.init().await?;

        if let Err(err) = self.write_files(context).await {
            error!("Write failed in {}: {}", self.store.dir().display(), err);
            self.store.reset_hard().await?;
            return Err(err);
        }

        self.store.stage_all().await?;
        self.store.status().await
    }

    /// Second half of commit mode: commit whatever is staged, or
    /// report `Unchanged`. Resets hard on commit failure.
    pub async fn commit_staged(&self, message: &str) -> Result<WriteOutcome, EngineError> {
        if self.store.status().await?.is_empty() {
            return Ok(WriteOutcome::Unchanged);
        }

        if let Err(err) = self.store.commit(message).await {
            error!("Commit failed in {}: {}", self.store.dir().display(), err);
            self.store.reset_hard().await?;
            return Err(err);
        }

        let revision = self
            .store
            .head()
            .await?
            .ok_or_else(|| EngineError::StoreError("no revision after commit".to_string()))?;
        Ok(WriteOutcome::Committed { revision })
    }

    /// Render every file of this configurable as (name, content) pairs.
    fn render_files(&self, context: &Value) -> Result<Vec<(String, String)>, EngineError> {
        let mut files = Vec::new();

        if let Some(content) = self.render_opt(&self.main_template, context)? {
            files.push((self.main_file.clone(), content));
        }

        for extra in &self.extra_files {
            let ctx = extra.context.as_ref().unwrap_or(context);
            let content = match &extra.source {
                FileSource::Template(template) => match self.render_opt(template, ctx)? {
                    Some(content) => content,
                    None => continue,
                },
                FileSource::Literal(content) => content.clone(),
            };
            files.push((extra.name.clone(), content));
        }

        Ok(files)
    }

    async fn write_files(&self, context: &Value) -> Result<(), EngineError> {
        for (name, content) in self.render_files(context)? {
            write_compared(self.store.dir(), &name, &content).await?;
        }
        Ok(())
    }
}

/// Write `content` to `dir/name`, leaving identical files untouched so
/// their mtimes survive a no-op run.
async fn write_compared(dir: &Path, name: &str, content: &str) -> Result<(), EngineError> {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::read_to_string(&path).await {
        Ok(existing) if existing == content => Ok(()),
        _ => {
            fs::write(&path, content).await?;
            Ok(())
        }
    }
}

/// Classify `content` against whatever is at `dir/name`, reading only.
async fn compare_existing(dir: &Path, name: &str, content: &str) -> FileChange {
    match fs::read_to_string(dir.join(name)).await {
        Ok(existing) if existing == content => FileChange::Unchanged,
        Ok(_) => FileChange::Changed,
        Err(_) => FileChange::New,
    }
}

fn split_changes(changes: &[(String, FileChange)]) -> (Vec<String>, Vec<String>) {
    let mut new = Vec::new();
    let mut changed = Vec::new();
    for (name, change) in changes {
        match change {
            FileChange::New => new.push(name.clone()),
            FileChange::Changed => changed.push(name.clone()),
            FileChange::Unchanged => {}
        }
    }
    (new, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn registry() -> Arc<Handlebars<'static>> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string("test/main.conf", "port={{port}}\n")
            .unwrap();
        registry
            .register_template_string("test/extra.conf", "name={{name}}\n")
            .unwrap();
        Arc::new(registry)
    }

    fn configurable(dir: &Path) -> Configurable {
        Configurable::new(
            registry(),
            ConfigStore::new(dir),
            "test",
            "main.conf",
            "main.conf",
        )
        .with_extra_files(vec![ExtraFile::from_template(
            "extra.conf",
            "extra.conf",
            Some(json!({"name": "app_0"})),
        )])
    }

    #[tokio::test]
    async fn preview_does_no_io() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf");
        let c = configurable(&dir);

        let outcome = c.write(&json!({"port": 8080}), WriteMode::Preview).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Preview("port=8080\n".to_string()));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf");
        let c = configurable(&dir);

        let outcome = c.write(&json!({"port": 8080}), WriteMode::DryRun).await.unwrap();
        match outcome {
            WriteOutcome::DryRun { new, changed } => {
                assert_eq!(new, vec!["main.conf", "extra.conf"]);
                assert!(changed.is_empty());
            }
            other => panic!("expected dry run outcome, got {:?}", other),
        }
        // Nothing was created, written or initialized.
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn dry_run_preserves_unversioned_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.conf"), "hand-written content\n").unwrap();
        let c = configurable(&dir);

        let outcome = c.write(&json!({"port": 8080}), WriteMode::DryRun).await.unwrap();
        match outcome {
            WriteOutcome::DryRun { new, changed } => {
                assert_eq!(new, vec!["extra.conf"]);
                assert_eq!(changed, vec!["main.conf"]);
            }
            other => panic!("expected dry run outcome, got {:?}", other),
        }

        assert_eq!(
            std::fs::read_to_string(dir.join("main.conf")).unwrap(),
            "hand-written content\n"
        );
        assert!(!dir.join("extra.conf").exists());
        assert!(!dir.join(".git").exists());
    }

    #[tokio::test]
    async fn commit_then_unchanged() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf");
        let c = configurable(&dir);
        let ctx = json!({"port": 8080});

        let first = c
            .write(&ctx, WriteMode::Commit { message: "deploy".to_string() })
            .await
            .unwrap();
        assert!(matches!(first, WriteOutcome::Committed { .. }));
        assert_eq!(
            fs::read_to_string(dir.join("extra.conf")).await.unwrap(),
            "name=app_0\n"
        );

        let second = c
            .write(&ctx, WriteMode::Commit { message: "deploy".to_string() })
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn failed_commit_resets_and_surfaces_one_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf");
        let c = configurable(&dir);

        let staged = c.stage(&json!({"port": 8080})).await.unwrap();
        assert!(!staged.is_empty());

        // A rejecting pre-commit hook makes the commit itself fail.
        let hook = dir.join(".git/hooks/pre-commit");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
        let mut perms = std::fs::metadata(&hook).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&hook, perms).unwrap();

        let err = c.commit_staged("deploy").await.unwrap_err();
        assert!(matches!(err, EngineError::CommitFailure(_)));
        assert_eq!(err.to_string().matches("Commit failed:").count(), 1);

        // The store was reset hard on the way out.
        assert!(c.store().status().await.unwrap().is_empty());
        assert!(!dir.join("main.conf").exists());
    }

    #[tokio::test]
    async fn missing_template_renders_empty() {
        let tmp = TempDir::new().unwrap();
        let c = configurable(&tmp.path().join("conf"));
        assert_eq!(c.render("nope.conf", &json!({})).unwrap(), "");
    }
}
