//! Distinguished name helpers

use const_oid::ObjectIdentifier;
use x509_cert::der::asn1::Any;
use x509_cert::der::{Tag, Tagged};
use x509_cert::name::Name;
use x509_cert::Certificate;

/// id-at-commonName
pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Return the common name of `name`.
///
/// When several CN attributes are present the last one wins.
pub fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|atv| atv.oid == COMMON_NAME)
        .filter_map(|atv| directory_string(&atv.value))
        .last()
}

/// Derive the depot lookup name for an issued certificate.
///
/// Certificates without a common name are keyed by the hex encoding of their
/// signature so the key is never empty.
pub fn cert_name(cert: &Certificate) -> String {
    match common_name(&cert.tbs_certificate.subject) {
        Some(cn) if !cn.is_empty() => cn,
        _ => hex::encode(cert.signature.raw_bytes()),
    }
}

fn directory_string(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::TeletexString
        | Tag::VisibleString => std::str::from_utf8(value.value()).ok().map(str::to_owned),
        _ => None,
    }
}
