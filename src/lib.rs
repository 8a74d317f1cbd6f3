//! SCEP Server Library
//!
//! This crate provides the certificate issuance engine of a SCEP server: the
//! PKIOperation state machine and the executable plugins that can take over
//! CA selection, CSR verification and subject rewriting. The SCEP wire codec,
//! the certificate depot and the challenge cache are supplied by the caller
//! through the traits in [`services`].

pub mod config;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use config::ScepConfig;
pub use services::{ScepService, ScepServiceBuilder};
pub use utils::{PluginError, ScepError, ScepResult};
