//! Subject rewriting
//!
//! The executable filter receives the raw decrypted CSR on stdin and prints
//! the subject to issue. It may answer with a re-encoded CSR (DER or a PEM
//! `CERTIFICATE REQUEST` block), in which case only its subject is used, or
//! with one `<dotted OID>=<percent-encoded value>` record per line:
//!
//! ```text
//! 2.5.4.10=Example%20Corp
//! 2.5.4.3=Alice%20Smith
//! ```
//!
//! Each record becomes a single-attribute RDN in line order. Values are
//! encoded as UTF8String except where X.520 fixes the string type (country
//! and serial number are PrintableString, domain component and email
//! address are IA5String).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use const_oid::db::rfc4519::{COUNTRY_NAME, DOMAIN_COMPONENT, SERIAL_NUMBER};
use const_oid::ObjectIdentifier;
use tracing::debug;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::der::asn1::{Any, Ia5StringRef, PrintableStringRef, SetOfVec};
use x509_cert::der::{Decode, Tag};
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::request::CertReq;

use crate::services::plugin::{PluginExecutable, PluginKind, StdoutMode};
use crate::utils::{PluginError, ScepResult};

const CSR_TAG: &str = "CERTIFICATE REQUEST";
const PEM_CSR_MARKER: &[u8] = b"-----BEGIN CERTIFICATE REQUEST-----";

/// ASN.1 SEQUENCE, the first byte of a DER encoded CSR
const DER_SEQUENCE: u8 = 0x30;

/// emailAddress (PKCS#9)
const EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

/// Replaces the subject of an incoming CSR
#[async_trait]
pub trait SubjectFilter: Send + Sync {
    /// Return the subject to issue for the decrypted CSR `data`
    async fn filter(&self, data: &[u8]) -> ScepResult<Name>;
}

/// Subject filter backed by an external executable
#[derive(Debug, Clone)]
pub struct ExecutableSubjectFilter {
    plugin: PluginExecutable,
}

impl ExecutableSubjectFilter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PluginError> {
        Ok(Self {
            plugin: PluginExecutable::new(PluginKind::SubjectFilter, path)?,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.plugin = self.plugin.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl SubjectFilter for ExecutableSubjectFilter {
    async fn filter(&self, data: &[u8]) -> ScepResult<Name> {
        let name = self
            .plugin
            .invoke(data, &[], StdoutMode::Capture, |output| {
                output.ensure_success(PluginKind::SubjectFilter)?;
                parse_filter_output(&output.stdout)
            })
            .await?;

        debug!(subject = %name, "Subject filter rewrote subject");
        Ok(name)
    }
}

/// Decode the filter's answer into a distinguished name
pub fn parse_filter_output(output: &[u8]) -> Result<Name, PluginError> {
    // '0' is also 0x30, so records whose OID starts with arc 0 must be
    // recognized before the DER check
    if starts_with_record(output) {
        return parse_attribute_lines(output);
    }

    if output.first() == Some(&DER_SEQUENCE) {
        let csr = CertReq::from_der(output)
            .map_err(|e| protocol(format!("invalid DER certificate request: {}", e)))?;
        return Ok(csr.info.subject);
    }

    if contains(output, PEM_CSR_MARKER) {
        let block = pem::parse(output).map_err(|e| protocol(format!("invalid PEM: {}", e)))?;
        if block.tag() != CSR_TAG {
            return Err(protocol(format!("unexpected {} block", block.tag())));
        }
        let csr = CertReq::from_der(block.contents())
            .map_err(|e| protocol(format!("invalid certificate request: {}", e)))?;
        return Ok(csr.info.subject);
    }

    parse_attribute_lines(output)
}

/// Whether the first non-blank line looks like `<digits>(.<digits>)+=`
fn starts_with_record(output: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(output) else {
        return false;
    };
    let Some(line) = text.split('\n').find(|line| !line.trim().is_empty()) else {
        return false;
    };
    let Some((oid, _)) = line.split_once('=') else {
        return false;
    };

    let mut arcs = 0;
    for arc in oid.split('.') {
        if arc.is_empty() || !arc.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        arcs += 1;
    }
    arcs >= 2
}

/// Parse `OID=value` records into one RDN per line
fn parse_attribute_lines(output: &[u8]) -> Result<Name, PluginError> {
    let text = std::str::from_utf8(output).map_err(|_| protocol("output is not valid UTF-8"))?;

    let mut rdns = Vec::new();
    for (index, raw_line) in text.split('\n').enumerate() {
        let line_no = index + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.trim().is_empty() {
            continue;
        }

        let (oid, value) = line
            .split_once('=')
            .ok_or_else(|| protocol(format!("missing '=' on line {}", line_no)))?;
        let oid = ObjectIdentifier::new(oid)
            .map_err(|e| protocol(format!("invalid OID {:?} on line {}: {}", oid, line_no, e)))?;
        let value = percent_decode(value)
            .ok_or_else(|| protocol(format!("invalid percent-encoding on line {}", line_no)))?;

        let atv = AttributeTypeAndValue {
            oid,
            value: encode_value(oid, &value)
                .map_err(|e| protocol(format!("cannot encode value on line {}: {}", line_no, e)))?,
        };
        let rdn = SetOfVec::try_from(vec![atv])
            .map_err(|e| protocol(format!("cannot build RDN on line {}: {}", line_no, e)))?;
        rdns.push(RelativeDistinguishedName(rdn));
    }

    if rdns.is_empty() {
        return Err(protocol("no subject attributes returned"));
    }

    Ok(RdnSequence(rdns))
}

/// Encode `value` with the string type X.520 prescribes for `oid`
fn encode_value(oid: ObjectIdentifier, value: &str) -> x509_cert::der::Result<Any> {
    if oid == COUNTRY_NAME || oid == SERIAL_NUMBER {
        PrintableStringRef::new(value)?;
        Any::new(Tag::PrintableString, value.as_bytes())
    } else if oid == DOMAIN_COMPONENT || oid == EMAIL_ADDRESS {
        Ia5StringRef::new(value)?;
        Any::new(Tag::Ia5String, value.as_bytes())
    } else {
        Any::new(Tag::Utf8String, value.as_bytes())
    }
}

/// Strict percent-decoding: every `%` must start a two digit hex escape
fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let escapes_valid = bytes.iter().enumerate().all(|(i, b)| {
        *b != b'%'
            || (bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit))
    });
    if !escapes_valid {
        return None;
    }
    urlencoding::decode(value).ok().map(|v| v.into_owned())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn protocol(message: impl Into<String>) -> PluginError {
    PluginError::Protocol {
        kind: PluginKind::SubjectFilter.name(),
        message: message.into(),
    }
}
