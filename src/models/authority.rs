//! Signing authority material

use rsa::RsaPrivateKey;
use x509_cert::Certificate;

use crate::utils::ScepError;

/// A CA private key with its certificate chain, leaf authority first
#[derive(Debug, Clone)]
pub struct AuthorityMaterial {
    key: RsaPrivateKey,
    chain: Vec<Certificate>,
}

impl AuthorityMaterial {
    /// Create authority material from a key and a non-empty chain
    pub fn new(key: RsaPrivateKey, chain: Vec<Certificate>) -> Result<Self, ScepError> {
        if chain.is_empty() {
            return Err(ScepError::MissingCaCertificate);
        }
        Ok(Self { key, chain })
    }

    /// The CA private key
    pub fn key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// The authority certificate that signs with [`Self::key`]
    pub fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    /// The full chain, authority certificate first
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }
}
