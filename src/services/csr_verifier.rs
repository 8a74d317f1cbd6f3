//! Request verification
//!
//! The executable verifier receives the raw decrypted CSR on stdin and
//! `TRANSACTIONID` in its environment. Exit status zero accepts the request.
//! Every failure to run the verifier is logged and treated as a rejection so
//! that clients never learn why their request was refused.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::services::plugin::{PluginExecutable, PluginKind, StdoutMode};
use crate::utils::{PluginError, ScepResult};

/// Decides whether a CSR may be issued
#[async_trait]
pub trait CsrVerifier: Send + Sync {
    /// `Ok(false)` rejects the request; `Err` aborts the transaction
    async fn verify(&self, transaction_id: &str, data: &[u8]) -> ScepResult<bool>;
}

/// CSR verifier backed by an external executable
#[derive(Debug, Clone)]
pub struct ExecutableCsrVerifier {
    plugin: PluginExecutable,
}

impl ExecutableCsrVerifier {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PluginError> {
        Ok(Self {
            plugin: PluginExecutable::new(PluginKind::CsrVerifier, path)?,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.plugin = self.plugin.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl CsrVerifier for ExecutableCsrVerifier {
    async fn verify(&self, transaction_id: &str, data: &[u8]) -> ScepResult<bool> {
        let env = [("TRANSACTIONID", OsStr::new(transaction_id))];

        match self.plugin.run(data, &env, StdoutMode::Log).await {
            Ok(output) if output.status.success() => Ok(true),
            Ok(output) => {
                info!(transaction_id, status = %output.status, "CSR verifier rejected request");
                Ok(false)
            }
            Err(e) => {
                warn!(transaction_id, "CSR verifier failed, rejecting request: {}", e);
                Ok(false)
            }
        }
    }
}
