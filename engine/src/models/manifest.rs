//! Application manifest parsing
//!
//! The manifest (`app.yaml`) is the per-project declarative file pushed
//! with the source. It names the domain, port and runtime and lists
//! ordered handlers: worker process definitions or opaque
//! proxy-passthrough blocks.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use tokio::fs;

use crate::errors::EngineError;

/// Parsed application manifest.
#[derive(Debug, Clone)]
pub struct AppManifest {
    pub domain: Option<String>,
    pub port: u16,
    pub runtime: String,
    pub handlers: Vec<Handler>,
}

/// One manifest entry, in manifest order.
#[derive(Debug, Clone)]
pub enum Handler {
    /// A worker process definition (`worker: <kind>`)
    Worker(WorkerHandler),

    /// An opaque block passed to the proxy vhost unchanged
    Passthrough(serde_json::Value),
}

/// A worker process definition.
#[derive(Debug, Clone)]
pub struct WorkerHandler {
    /// Worker kind key, resolved against the registered worker set
    pub kind: String,

    /// Remaining handler parameters (after defaults merging)
    pub params: serde_json::Value,
}

impl AppManifest {
    /// Parse a manifest from YAML text.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let doc: Value = serde_yaml::from_str(text)?;
        let top = doc
            .as_mapping()
            .ok_or_else(|| EngineError::ManifestError("manifest is not a mapping".to_string()))?;

        let domain = get_str(top, "domain");
        let port = match top.get("port") {
            Some(v) => v
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| EngineError::ManifestError("invalid port".to_string()))?,
            None => 80,
        };
        let runtime = get_str(top, "runtime").unwrap_or_else(|| "python".to_string());

        let mut handlers = Vec::new();
        if let Some(list) = top.get("handlers") {
            let list = list.as_sequence().ok_or_else(|| {
                EngineError::ManifestError("handlers must be a list".to_string())
            })?;
            for (position, entry) in list.iter().enumerate() {
                let mapping = entry.as_mapping().ok_or_else(|| {
                    EngineError::ManifestError(format!("handler {} is not a mapping", position))
                })?;
                handlers.push(parse_handler(top, mapping, position)?);
            }
        }

        Ok(Self {
            domain,
            port,
            runtime,
            handlers,
        })
    }

    /// Read and parse the manifest file at `path`.
    ///
    /// A missing file is a precondition failure, never defaulted.
    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.is_file() {
            return Err(EngineError::Precondition(format!(
                "project missing {} file",
                crate::models::project::MANIFEST_FILE
            )));
        }
        let text = fs::read_to_string(path).await?;
        Self::parse(&text)
    }

}

/// Classify one handler mapping, applying defaults merging first.
///
/// `defaults: <name>` pulls in the same-named top-level mapping; the
/// handler's own keys win on conflict.
fn parse_handler(top: &Mapping, handler: &Mapping, position: usize) -> Result<Handler, EngineError> {
    let mut merged = Mapping::new();

    if let Some(name) = get_str(handler, "defaults") {
        let defaults = top
            .get(name.as_str())
            .and_then(Value::as_mapping)
            .ok_or_else(|| {
                EngineError::ManifestError(format!(
                    "handler {} references unknown defaults '{}'",
                    position, name
                ))
            })?;
        for (k, v) in defaults {
            merged.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in handler {
        if k.as_str() == Some("defaults") {
            continue;
        }
        merged.insert(k.clone(), v.clone());
    }

    let kind = get_str(&merged, "worker");
    match kind {
        Some(kind) if !kind.is_empty() => {
            merged.remove("worker");
            let params = serde_json::to_value(&merged)?;
            Ok(Handler::Worker(WorkerHandler { kind, params }))
        }
        _ => Ok(Handler::Passthrough(serde_json::to_value(&merged)?)),
    }
}

fn get_str(mapping: &Mapping, key: &str) -> Option<String> {
    mapping
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}
