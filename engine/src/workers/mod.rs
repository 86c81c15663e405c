//! Worker kinds
//!
//! A manifest handler names its worker by string key (`worker: wsgi`).
//! The keys resolve against a closed set registered at startup; there
//! is no dynamic loading of handler implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::EngineError;

/// One registered worker kind: how its startup artifact is rendered and
/// how the supervisor launches it.
pub trait WorkerKind: Send + Sync {
    /// Manifest key for this kind
    fn key(&self) -> &'static str;

    /// Template that renders the startup script/config
    fn startup_template(&self) -> &'static str;

    /// File name of the startup artifact for a generated worker name
    fn script_name(&self, worker: &str) -> String;

    /// Supervisor command line launching the worker
    fn command(&self, script_path: &str) -> String;
}

/// Gunicorn-style python WSGI worker.
struct WsgiWorker;

impl WorkerKind for WsgiWorker {
    fn key(&self) -> &'static str {
        "wsgi"
    }

    fn startup_template(&self) -> &'static str {
        "worker/wsgi.py"
    }

    fn script_name(&self, worker: &str) -> String {
        format!("{}.py", worker)
    }

    fn command(&self, script_path: &str) -> String {
        format!("python {}", script_path)
    }
}

/// uWSGI worker driven by a generated ini file.
struct UwsgiWorker;

impl WorkerKind for UwsgiWorker {
    fn key(&self) -> &'static str {
        "uwsgi"
    }

    fn startup_template(&self) -> &'static str {
        "worker/uwsgi.ini"
    }

    fn script_name(&self, worker: &str) -> String {
        format!("{}.ini", worker)
    }

    fn command(&self, script_path: &str) -> String {
        format!("uwsgi --ini {}", script_path)
    }
}

/// FastCGI worker wrapped in a shell launcher.
struct FastcgiWorker;

impl WorkerKind for FastcgiWorker {
    fn key(&self) -> &'static str {
        "fastcgi"
    }

    fn startup_template(&self) -> &'static str {
        "worker/fastcgi.sh"
    }

    fn script_name(&self, worker: &str) -> String {
        format!("{}.sh", worker)
    }

    fn command(&self, script_path: &str) -> String {
        format!("sh {}", script_path)
    }
}

/// The closed set of worker kinds, resolved by manifest key.
pub struct WorkerRegistry {
    kinds: HashMap<&'static str, Arc<dyn WorkerKind>>,
}

impl WorkerRegistry {
    /// Registry with the built-in kinds.
    pub fn builtin() -> Self {
        let mut registry = Self {
            kinds: HashMap::new(),
        };
        registry.register(Arc::new(WsgiWorker));
        registry.register(Arc::new(UwsgiWorker));
        registry.register(Arc::new(FastcgiWorker));
        registry
    }

    pub fn register(&mut self, kind: Arc<dyn WorkerKind>) {
        self.kinds.insert(kind.key(), kind);
    }

    /// Resolve a manifest worker key. Unknown keys are a precondition
    /// failure, surfaced before any config is written.
    pub fn get(&self, key: &str) -> Result<Arc<dyn WorkerKind>, EngineError> {
        self.kinds
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::Precondition(format!("unknown worker kind '{}'", key)))
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
