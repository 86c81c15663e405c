//! Process-supervisor control client
//!
//! Thin XML-RPC client against a running supervisor daemon's control
//! endpoint. The pipeline only needs config rereads, process-group
//! management and start/stop; every call is synchronous from its point
//! of view and any connectivity or daemon fault is fatal for the
//! current deploy, except "process group already added" which is a
//! semantic no-op.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::errors::EngineError;

/// Supervisor fault code for "process group already added".
const FAULT_ALREADY_ADDED: i32 = 90;

/// Control surface of the process supervisor.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Make the daemon reread its configuration files.
    async fn reread_config(&self) -> Result<(), EngineError>;

    /// Register a process group. Idempotent: an "already added" fault
    /// is swallowed and logged.
    async fn add_process_group(&self, name: &str) -> Result<(), EngineError>;

    async fn start(&self, name: &str) -> Result<(), EngineError>;

    async fn stop(&self, name: &str) -> Result<(), EngineError>;

    async fn restart(&self, name: &str) -> Result<(), EngineError> {
        self.stop(name).await?;
        self.start(name).await
    }
}

/// XML-RPC client for the supervisor control socket.
pub struct SupervisorClient {
    client: Client,
    endpoint: Url,
    credentials: Option<(String, String)>,
}

impl SupervisorClient {
    /// Create a client for the daemon's RPC endpoint
    /// (e.g. `http://127.0.0.1:9001/RPC2`).
    pub fn new(endpoint: &str, credentials: Option<(String, String)>) -> Result<Self, EngineError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| EngineError::ConfigError(format!("invalid supervisor endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }

    async fn call(&self, method: &str, params: &[&str]) -> Result<(), EngineError> {
        let body = build_method_call(method, params);
        debug!("supervisor RPC {} {:?}", method, params);

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "text/xml")
            .body(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|e| {
            EngineError::SupervisorError(format!("cannot reach supervisor: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(EngineError::SupervisorError(format!(
                "supervisor returned {}",
                response.status()
            )));
        }

        let text = response.text().await?;
        if let Some((code, message)) = parse_fault(&text) {
            return Err(EngineError::SupervisorFault { code, message });
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for SupervisorClient {
    async fn reread_config(&self) -> Result<(), EngineError> {
        self.call("supervisor.reloadConfig", &[]).await
    }

    async fn add_process_group(&self, name: &str) -> Result<(), EngineError> {
        match self.call("supervisor.addProcessGroup", &[name]).await {
            Err(EngineError::SupervisorFault { code, .. }) if code == FAULT_ALREADY_ADDED => {
                warn!("Process group {} already added", name);
                Ok(())
            }
            other => other,
        }
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        self.call("supervisor.startProcessGroup", &[name]).await
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        self.call("supervisor.stopProcessGroup", &[name]).await
    }
}

fn build_method_call(method: &str, params: &[&str]) -> String {
    let mut body = String::from("<?xml version=\"1.0\"?>\n<methodCall>\n");
    body.push_str(&format!("<methodName>{}</methodName>\n", method));
    body.push_str("<params>\n");
    for param in params {
        body.push_str(&format!(
            "<param><value><string>{}</string></value></param>\n",
            xml_escape(param)
        ));
    }
    body.push_str("</params>\n</methodCall>\n");
    body
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Extract (faultCode, faultString) from a methodResponse, if it is a
/// fault.
fn parse_fault(body: &str) -> Option<(i32, String)> {
    if !body.contains("<fault>") {
        return None;
    }
    let code = tag_after(body, "faultCode", "int")
        .or_else(|| tag_after(body, "faultCode", "i4"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(-1);
    let message = tag_after(body, "faultString", "string").unwrap_or_default();
    Some((code, message))
}

/// Value of the first `<tag>...</tag>` appearing after `anchor`.
fn tag_after(body: &str, anchor: &str, tag: &str) -> Option<String> {
    let rest = &body[body.find(anchor)? + anchor.len()..];
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = rest.find(&open)? + open.len();
    let end = rest[start..].find(&close)? + start;
    Some(rest[start..end].to_string())
}
