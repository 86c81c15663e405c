//! Dockhand Deployment Engine
//!
//! Core modules for the dockhand multi-tenant deployment engine:
//! git-backed configuration storage, template rendering, unix identity
//! allocation, process-supervisor and reverse-proxy control, and the
//! deploy pipeline that ties them together.

pub mod api;
pub mod app;
pub mod deploy;
pub mod errors;
pub mod identity;
pub mod logs;
pub mod models;
pub mod proxy;
pub mod store;
pub mod supervisor;
pub mod utils;
pub mod workers;
