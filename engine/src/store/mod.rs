//! Version-controlled configuration storage

pub mod configurable;
pub mod git;
pub mod layout;
pub mod templates;

pub use configurable::{Configurable, ExtraFile, WriteMode, WriteOutcome};
pub use git::ConfigStore;
pub use layout::ConfigLayout;
