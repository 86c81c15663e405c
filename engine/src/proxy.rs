//! Reverse-proxy control
//!
//! Generates virtual-host configuration for projects and triggers the
//! proxy's reload/start/stop, either through the process supervisor
//! (when the proxy runs as a supervised group) or by shelling out to
//! the proxy's own control commands.

use std::sync::Arc;

use handlebars::Handlebars;
use serde_json::Value;
use tracing::info;

use crate::errors::EngineError;
use crate::store::{Configurable, ConfigStore, ExtraFile, WriteMode, WriteOutcome};
use crate::supervisor::ProcessSupervisor;
use crate::utils::shell;

/// How the proxy daemon itself is driven.
#[derive(Debug, Clone)]
pub enum ProxyControl {
    /// The proxy runs as a supervised process group
    Supervised { group: String },

    /// The proxy is driven by its own command lines
    Command {
        reload: String,
        start: String,
        stop: String,
    },
}

/// Controller for one proxy flavor (e.g. nginx).
pub struct ReverseProxyController {
    registry: Arc<Handlebars<'static>>,
    name: String,
    control: ProxyControl,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl ReverseProxyController {
    pub fn new(
        registry: Arc<Handlebars<'static>>,
        name: impl Into<String>,
        control: ProxyControl,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self {
            registry,
            name: name.into(),
            control,
            supervisor,
        }
    }

    /// Template namespace for this proxy flavor.
    fn template_base(&self) -> String {
        format!("proxy/{}", self.name)
    }

    /// Configurable maintaining the proxy's own main configuration.
    pub fn main_configurable(&self, store: ConfigStore) -> Configurable {
        Configurable::new(
            Arc::clone(&self.registry),
            store,
            self.template_base(),
            format!("{}.conf", self.name),
            "main.conf",
        )
    }

    /// Configurable for a project's vhost fragment plus any extra files
    /// committed alongside it.
    pub fn vhost_configurable(&self, store: ConfigStore, extras: Vec<ExtraFile>) -> Configurable {
        Configurable::new(
            Arc::clone(&self.registry),
            store,
            self.template_base(),
            "vhost.conf",
            "vhost.conf",
        )
        .with_extra_files(extras)
    }

    /// Render and store the proxy's own main configuration file.
    pub async fn write_main_conf(
        &self,
        store: ConfigStore,
        context: &Value,
        mode: WriteMode,
    ) -> Result<WriteOutcome, EngineError> {
        self.main_configurable(store).write(context, mode).await
    }

    /// Render and store a project's vhost fragment.
    pub async fn write_vhost(
        &self,
        store: ConfigStore,
        context: &Value,
        mode: WriteMode,
    ) -> Result<WriteOutcome, EngineError> {
        self.vhost_configurable(store, Vec::new())
            .write(context, mode)
            .await
    }

    pub async fn reload(&self) -> Result<(), EngineError> {
        info!("Reloading proxy {}", self.name);
        match &self.control {
            ProxyControl::Supervised { group } => self
                .supervisor
                .restart(group)
                .await
                .map_err(|e| EngineError::ReloadFailure(e.to_string())),
            ProxyControl::Command { reload, .. } => self.control_command(reload).await,
        }
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        match &self.control {
            ProxyControl::Supervised { group } => self
                .supervisor
                .start(group)
                .await
                .map_err(|e| EngineError::ReloadFailure(e.to_string())),
            ProxyControl::Command { start, .. } => self.control_command(start).await,
        }
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        match &self.control {
            ProxyControl::Supervised { group } => self
                .supervisor
                .stop(group)
                .await
                .map_err(|e| EngineError::ReloadFailure(e.to_string())),
            ProxyControl::Command { stop, .. } => self.control_command(stop).await,
        }
    }

    async fn control_command(&self, command: &str) -> Result<(), EngineError> {
        let (status, output) = shell(command).await?;
        if status != 0 {
            return Err(EngineError::ReloadFailure(format!(
                "proxy command '{}' exited with status {}: {}",
                command,
                status,
                output.trim()
            )));
        }
        Ok(())
    }
}
