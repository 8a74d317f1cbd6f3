//! Shared utilities

pub mod error;
pub mod name;

pub use error::{PluginError, ScepError, ScepResult};
