//! On-disk engine settings
//!
//! The settings file is a small YAML document describing where the
//! generated configuration lives, how to reach the supervisor daemon,
//! which proxy flavor to control and the project/cluster inventory the
//! in-memory registries are seeded from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::app::options::{EngineOptions, ProxyOptions, SupervisorOptions};
use crate::deploy::PipelineOptions;
use crate::errors::EngineError;
use crate::logs::LogLevel;
use crate::models::{Cluster, Project};
use crate::proxy::ProxyControl;
use crate::store::ConfigLayout;

/// Engine settings as loaded from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Root of the generated-configuration tree
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default)]
    pub log_level: Option<LogLevel>,

    /// Fallback vhost for projects with no default domain
    #[serde(default = "default_vhost")]
    pub default_vhost: String,

    /// Age after which a held deploy lock is reported as stale
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: Option<u64>,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub proxy: ProxySettings,

    /// Project inventory
    #[serde(default)]
    pub projects: Vec<Project>,

    /// Cluster inventory
    #[serde(default)]
    pub clusters: Vec<Cluster>,

    /// Cluster assumed when a deploy names none
    #[serde(default)]
    pub default_cluster: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSettings {
    #[serde(default = "default_supervisor_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            endpoint: default_supervisor_endpoint(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// Proxy flavor, selects the template namespace
    #[serde(default = "default_proxy_name")]
    pub name: String,

    /// Unix account the proxy's worker processes run as
    #[serde(default = "default_proxy_user")]
    pub user: String,

    /// Supervisor group the proxy runs under; used unless explicit
    /// control commands are given
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub reload_cmd: Option<String>,

    #[serde(default)]
    pub start_cmd: Option<String>,

    #[serde(default)]
    pub stop_cmd: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            name: default_proxy_name(),
            user: default_proxy_user(),
            group: None,
            reload_cmd: None,
            start_cmd: None,
            stop_cmd: None,
        }
    }
}

impl ProxySettings {
    /// Explicit commands win over supervised control.
    fn control(&self) -> ProxyControl {
        if let Some(reload) = &self.reload_cmd {
            ProxyControl::Command {
                reload: reload.clone(),
                start: self.start_cmd.clone().unwrap_or_default(),
                stop: self.stop_cmd.clone().unwrap_or_default(),
            }
        } else {
            ProxyControl::Supervised {
                group: self.group.clone().unwrap_or_else(|| "proxy".to_string()),
            }
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            log_level: None,
            default_vhost: default_vhost(),
            lock_stale_secs: default_lock_stale_secs(),
            supervisor: SupervisorSettings::default(),
            proxy: ProxySettings::default(),
            projects: Vec::new(),
            clusters: Vec::new(),
            default_cluster: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        debug!("Loading settings from {}", path.display());
        let text = fs::read_to_string(path).await.map_err(|err| {
            EngineError::ConfigError(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::parse(&text)
    }

    /// Parse settings from YAML text.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let settings: Settings = serde_yaml::from_str(text)
            .map_err(|err| EngineError::ConfigError(format!("invalid settings: {}", err)))?;
        Ok(settings)
    }

    /// Derive engine options from the loaded settings.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            layout: ConfigLayout::new(&self.base_dir),
            supervisor: SupervisorOptions {
                endpoint: self.supervisor.endpoint.clone(),
                username: self.supervisor.username.clone(),
                password: self.supervisor.password.clone(),
            },
            proxy: ProxyOptions {
                name: self.proxy.name.clone(),
                user: self.proxy.user.clone(),
                control: self.proxy.control(),
            },
            pipeline: PipelineOptions {
                default_vhost: self.default_vhost.clone(),
                lock_stale_after: self.lock_stale_secs.map(Duration::from_secs),
            },
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/lib/dockhand")
}

fn default_vhost() -> String {
    "localhost".to_string()
}

fn default_lock_stale_secs() -> Option<u64> {
    Some(1800)
}

fn default_supervisor_endpoint() -> String {
    "http://127.0.0.1:9001/RPC2".to_string()
}

fn default_proxy_name() -> String {
    "nginx".to_string()
}

fn default_proxy_user() -> String {
    "www-data".to_string()
}
