//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Key, certificate and CSR fixtures
//! - Mock collaborators
//! - Service setup

#![allow(dead_code)]

pub mod test_service;

pub use fixtures::*;
pub use mocks::*;
pub use test_service::*;
