//! Per-request signing authority selection
//!
//! The executable chooser receives the raw decrypted CSR on stdin and
//! `CAKEYPASS` in its environment. It answers with an encrypted
//! `RSA PRIVATE KEY` block followed by `TRUSTED CERTIFICATE` blocks, each
//! holding one or more DER certificates.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use tracing::debug;
use x509_cert::der::{Decode, Reader, SliceReader};
use x509_cert::Certificate;

use crate::models::AuthorityMaterial;
use crate::services::pem_decrypt;
use crate::services::plugin::{PluginExecutable, PluginKind, StdoutMode};
use crate::utils::{PluginError, ScepResult};

const KEY_TAG: &str = "RSA PRIVATE KEY";
const CHAIN_TAG: &str = "TRUSTED CERTIFICATE";

/// Selects the authority that issues a request
#[async_trait]
pub trait CaChooser: Send + Sync {
    /// Return the signing key and chain for the decrypted CSR `data`
    async fn choose(&self, data: &[u8], ca_key_pass: &[u8]) -> ScepResult<AuthorityMaterial>;
}

/// CA chooser backed by an external executable
#[derive(Debug, Clone)]
pub struct ExecutableCaChooser {
    plugin: PluginExecutable,
}

impl ExecutableCaChooser {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PluginError> {
        Ok(Self {
            plugin: PluginExecutable::new(PluginKind::CaChooser, path)?,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.plugin = self.plugin.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl CaChooser for ExecutableCaChooser {
    async fn choose(&self, data: &[u8], ca_key_pass: &[u8]) -> ScepResult<AuthorityMaterial> {
        let pass = OsString::from_vec(ca_key_pass.to_vec());
        let env = [("CAKEYPASS", pass.as_os_str())];

        let material = self
            .plugin
            .invoke(data, &env, StdoutMode::Capture, |output| {
                output.ensure_success(PluginKind::CaChooser)?;
                parse_chooser_output(&output.stdout, ca_key_pass)
            })
            .await?;

        debug!(
            chain_len = material.chain().len(),
            "CA chooser selected issuing authority"
        );
        Ok(material)
    }
}

/// Decode the chooser's PEM answer into authority material
pub fn parse_chooser_output(
    output: &[u8],
    ca_key_pass: &[u8],
) -> Result<AuthorityMaterial, PluginError> {
    let blocks = pem::parse_many(output).map_err(|e| protocol(format!("invalid PEM: {}", e)))?;

    let (key_block, chain_blocks) = match blocks.split_first() {
        Some((first, rest)) if first.tag() == KEY_TAG => (first, rest),
        _ => return Err(protocol("unrecognized PEM format (no RSA PRIVATE KEY found)")),
    };

    let key_der = pem_decrypt::decrypt_block(key_block, ca_key_pass)
        .map_err(|e| protocol(format!("cannot decrypt CA key: {:#}", e)))?;
    let key = RsaPrivateKey::from_pkcs1_der(&key_der)
        .map_err(|e| protocol(format!("invalid PKCS#1 CA key: {}", e)))?;

    let mut chain = Vec::new();
    for block in chain_blocks {
        if block.tag() != CHAIN_TAG {
            return Err(protocol(format!(
                "unrecognized PEM format (unexpected {} block)",
                block.tag()
            )));
        }
        let certs = parse_certificates(block.contents())
            .map_err(|e| protocol(format!("invalid certificate: {}", e)))?;
        chain.extend(certs);
    }

    AuthorityMaterial::new(key, chain).map_err(|_| protocol("no CA certificate returned"))
}

/// Parse a buffer of concatenated DER certificates
fn parse_certificates(der: &[u8]) -> x509_cert::der::Result<Vec<Certificate>> {
    let mut reader = SliceReader::new(der)?;
    let mut certs = Vec::new();
    while !reader.is_finished() {
        certs.push(Certificate::decode(&mut reader)?);
    }
    Ok(certs)
}

fn protocol(message: impl Into<String>) -> PluginError {
    PluginError::Protocol {
        kind: PluginKind::CaChooser.name(),
        message: message.into(),
    }
}
