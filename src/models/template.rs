//! Certificate template handed to the codec for signing

use chrono::{DateTime, Duration, Utc};
use const_oid::ObjectIdentifier;
use x509_cert::ext::pkix::{KeyUsage, KeyUsages};
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

/// id-kp-clientAuth
pub const CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");

/// How far notBefore is moved into the past to absorb client clock skew
pub const BACKDATE_MINUTES: i64 = 10;

/// Fields of a client certificate about to be issued
#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    pub serial_number: SerialNumber,
    pub subject: Name,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_key_id: Vec<u8>,
    pub key_usage: KeyUsage,
    pub extended_key_usage: Vec<ObjectIdentifier>,
    /// Inherited from the CSR
    pub signature_algorithm: AlgorithmIdentifierOwned,
    pub public_key: SubjectPublicKeyInfoOwned,
}

impl CertificateTemplate {
    /// Build the template for a client certificate valid `validity_days` from `now`
    pub fn for_client(
        serial_number: SerialNumber,
        csr: &CertReq,
        subject_key_id: Vec<u8>,
        validity_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            serial_number,
            subject: csr.info.subject.clone(),
            not_before: now - Duration::minutes(BACKDATE_MINUTES),
            not_after: now + Duration::days(i64::from(validity_days)),
            subject_key_id,
            key_usage: KeyUsage(KeyUsages::DigitalSignature.into()),
            extended_key_usage: vec![CLIENT_AUTH],
            signature_algorithm: csr.algorithm.clone(),
            public_key: csr.info.public_key.clone(),
        }
    }
}
