//! SCEP message codec
//!
//! Parsing, decrypting and replying to PKCS#7 enveloped PKI messages is done
//! by an external codec. The issuance engine only sequences these calls.

use rsa::RsaPrivateKey;
use x509_cert::Certificate;

use crate::models::{CertificateTemplate, DecryptedRequest, FailInfo, PkiMessage, SignedReply};

/// Enrollment protocol codec
pub trait PkiCodec: Send + Sync {
    /// Parse the signed envelope of an incoming PKIOperation
    fn parse(&self, envelope: &[u8]) -> anyhow::Result<PkiMessage>;

    /// Decrypt the enveloped CSR with the CA certificate and key
    fn decrypt(
        &self,
        message: &PkiMessage,
        ca_cert: &Certificate,
        ca_key: &RsaPrivateKey,
    ) -> anyhow::Result<DecryptedRequest>;

    /// Build a signed CertRep with pkiStatus FAILURE
    fn build_rejection(
        &self,
        message: &PkiMessage,
        ca_cert: &Certificate,
        ca_key: &RsaPrivateKey,
        fail_info: FailInfo,
    ) -> anyhow::Result<Vec<u8>>;

    /// Issue the certificate described by `template` and wrap it in a CertRep.
    ///
    /// `ca_cert`/`ca_key` sign the reply envelope, `issuer_cert`/`issuer_key`
    /// sign the certificate itself.
    fn sign(
        &self,
        request: &DecryptedRequest,
        ca_cert: &Certificate,
        ca_key: &RsaPrivateKey,
        issuer_cert: &Certificate,
        issuer_key: &RsaPrivateKey,
        template: &CertificateTemplate,
    ) -> anyhow::Result<SignedReply>;

    /// Encode certificates as a degenerate certificates-only PKCS#7 bundle
    fn degenerate_certificates(&self, certs: &[Certificate]) -> anyhow::Result<Vec<u8>>;
}
