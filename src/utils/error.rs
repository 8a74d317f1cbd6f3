//! Error types and handling
//!
//! Every transaction-fatal condition of the issuance engine maps to one
//! [`ScepError`] variant. A challenge or verifier rejection is *not* an error:
//! it produces a signed negative reply (see `PkiOperationOutcome::Rejected`).

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Service error types
#[derive(Debug, Error)]
pub enum ScepError {
    /// Construction-time failure (bad plugin path, missing CA material)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The envelope could not be parsed or a reply could not be encoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// The enveloped request could not be decrypted with the CA key
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// An error occurred while deciding whether to trust a request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Subject key identifiers can only be derived from RSA keys
    #[error("Unsupported public key: {0}")]
    UnsupportedKey(String),

    /// The message type does not carry a certificate request
    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),

    /// Certificate signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// The certificate depot failed or refused the certificate
    #[error("Depot error: {0}")]
    Store(String),

    /// The success notifier denied or failed to process the certificate
    #[error("Notification error: {0}")]
    Notification(String),

    /// A plugin produced output that could not be decoded
    #[error("Plugin protocol error: {0}")]
    PluginProtocol(String),

    /// A plugin process could not be run to completion
    #[error("Plugin process error: {0}")]
    PluginProcess(String),

    /// The service has no CA certificate to hand out
    #[error("Missing CA certificate")]
    MissingCaCertificate,

    /// The operation is part of the protocol surface but not implemented
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

/// Errors raised by the subprocess plugin bridge
#[derive(Debug, Error)]
pub enum PluginError {
    /// The configured executable failed construction-time validation
    #[error("{kind} executable {path:?} {reason}")]
    InvalidExecutable {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The process could not be started
    #[error("failed to spawn {kind}: {source}")]
    Spawn {
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Reading output or waiting for the process failed
    #[error("failed to run {kind}: {source}")]
    Io {
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("{kind} exited with {status}")]
    Exit { kind: &'static str, status: ExitStatus },

    /// The process did not finish within the configured timeout
    #[error("{kind} timed out after {timeout:?}")]
    Timeout { kind: &'static str, timeout: Duration },

    /// The process output did not follow the plugin's wire format
    #[error("{kind} output: {message}")]
    Protocol { kind: &'static str, message: String },
}

impl From<PluginError> for ScepError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::InvalidExecutable { .. } => ScepError::Config(err.to_string()),
            PluginError::Protocol { .. } => ScepError::PluginProtocol(err.to_string()),
            _ => ScepError::PluginProcess(err.to_string()),
        }
    }
}

/// Result type alias for service operations
pub type ScepResult<T> = Result<T, ScepError>;
