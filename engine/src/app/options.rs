//! Engine configuration options

use crate::deploy::PipelineOptions;
use crate::proxy::ProxyControl;
use crate::store::ConfigLayout;

/// Main engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Generated-configuration tree layout
    pub layout: ConfigLayout,

    /// Supervisor daemon connection
    pub supervisor: SupervisorOptions,

    /// Reverse proxy flavor and control mode
    pub proxy: ProxyOptions,

    /// Deploy pipeline options
    pub pipeline: PipelineOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            layout: ConfigLayout::default(),
            supervisor: SupervisorOptions::default(),
            proxy: ProxyOptions::default(),
            pipeline: PipelineOptions::default(),
        }
    }
}

/// Supervisor daemon connection options
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// XML-RPC endpoint of the control socket
    pub endpoint: String,

    /// Basic-auth credentials, if the endpoint requires them
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9001/RPC2".to_string(),
            username: None,
            password: None,
        }
    }
}

impl SupervisorOptions {
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

/// Reverse proxy options
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Proxy flavor, selects the template namespace (e.g. "nginx")
    pub name: String,

    /// Unix account the proxy's worker processes run as
    pub user: String,

    pub control: ProxyControl,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            name: "nginx".to_string(),
            user: "www-data".to_string(),
            control: ProxyControl::Supervised {
                group: "proxy".to_string(),
            },
        }
    }
}
