//! Issuance outcome notifications

use async_trait::async_trait;

/// Told about every certificate that was issued and persisted
#[async_trait]
pub trait CertSuccesser: Send + Sync {
    /// `Ok(false)` fails the transaction after the certificate was stored
    async fn success(&self, transaction_id: &str, csr: &[u8], locator: &str) -> anyhow::Result<bool>;
}

/// Told about every transaction that was rejected or failed after parsing
#[async_trait]
pub trait CertFailer: Send + Sync {
    /// `csr` is empty when the request could not be decrypted
    async fn fail(&self, transaction_id: &str, csr: &[u8], reason: &str) -> anyhow::Result<()>;
}
