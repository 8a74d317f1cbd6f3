//! Certificate depot
//!
//! Storage of the CA material and of issued certificates is external.

use async_trait::async_trait;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

use crate::models::AuthorityMaterial;

/// Certificate store used during issuance
#[async_trait]
pub trait Depot: Send + Sync {
    /// Load the default CA key and chain, decrypting the key with `key_password`
    async fn ca(&self, key_password: &[u8]) -> anyhow::Result<AuthorityMaterial>;

    /// Allocate the next serial number
    async fn serial(&self) -> anyhow::Result<SerialNumber>;

    /// Check for an existing certificate stored under `name`.
    ///
    /// A certificate expiring within `allow_renewal_days` is revoked (when
    /// `revoke_old` is set) and issuance may proceed; any other live
    /// certificate is a duplicate and yields an error.
    async fn has_cn(
        &self,
        name: &str,
        allow_renewal_days: u32,
        cert: &Certificate,
        revoke_old: bool,
    ) -> anyhow::Result<bool>;

    /// Persist an issued certificate
    async fn put(&self, name: &str, cert: &Certificate) -> anyhow::Result<()>;

    /// Where the persisted certificate can be found, for notifications
    async fn cert_locator(&self, name: &str, cert: &Certificate) -> anyhow::Result<String>;
}
