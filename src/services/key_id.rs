//! Subject key identifier derivation
//!
//! The identifier is the 160-bit SHA-1 hash of the DER encoded PKCS#1
//! `RSAPublicKey { modulus, publicExponent }` of the request's public key.

use const_oid::ObjectIdentifier;
use rsa::pkcs1::RsaPublicKey as Pkcs1PublicKey;
use sha1::{Digest, Sha1};
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::utils::ScepError;

/// rsaEncryption
pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Generate the subject key identifier for a public key
pub fn generate_subject_key_id(spki: &SubjectPublicKeyInfoOwned) -> Result<Vec<u8>, ScepError> {
    if spki.algorithm.oid != RSA_ENCRYPTION {
        return Err(ScepError::UnsupportedKey(format!(
            "only RSA public keys are supported, got algorithm {}",
            spki.algorithm.oid
        )));
    }

    let key_bytes = spki.subject_public_key.as_bytes().ok_or_else(|| {
        ScepError::UnsupportedKey("public key bit string is not octet aligned".to_string())
    })?;

    // Re-encode so the hash covers the canonical DER of (N, E) only.
    let key = Pkcs1PublicKey::from_der(key_bytes)
        .map_err(|e| ScepError::UnsupportedKey(format!("invalid RSA public key: {}", e)))?;
    let encoded = key
        .to_der()
        .map_err(|e| ScepError::UnsupportedKey(format!("failed to encode RSA public key: {}", e)))?;

    Ok(Sha1::digest(&encoded).to_vec())
}
