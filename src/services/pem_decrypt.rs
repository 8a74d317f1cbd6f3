//! Legacy encrypted PEM blocks
//!
//! OpenSSL "traditional" key encryption: the block carries
//! `Proc-Type: 4,ENCRYPTED` and `DEK-Info: <cipher>,<hex iv>` headers, the key
//! is derived from the passphrase with MD5 `EVP_BytesToKey` using the first
//! eight IV bytes as salt, and the body is CBC encrypted with PKCS#7 padding.

use anyhow::{bail, Context, Result};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockCipher, BlockDecryptMut, KeyInit, KeyIvInit};
use md5::{Digest, Md5};
use pem::Pem;

const PROC_TYPE: &str = "Proc-Type";
const DEK_INFO: &str = "DEK-Info";
const ENCRYPTED: &str = "4,ENCRYPTED";

/// Ciphers accepted in the DEK-Info header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemCipher {
    DesCbc,
    DesEde3Cbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl PemCipher {
    /// Look up a cipher by its DEK-Info name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DES-CBC" => Some(PemCipher::DesCbc),
            "DES-EDE3-CBC" => Some(PemCipher::DesEde3Cbc),
            "AES-128-CBC" => Some(PemCipher::Aes128Cbc),
            "AES-192-CBC" => Some(PemCipher::Aes192Cbc),
            "AES-256-CBC" => Some(PemCipher::Aes256Cbc),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PemCipher::DesCbc => "DES-CBC",
            PemCipher::DesEde3Cbc => "DES-EDE3-CBC",
            PemCipher::Aes128Cbc => "AES-128-CBC",
            PemCipher::Aes192Cbc => "AES-192-CBC",
            PemCipher::Aes256Cbc => "AES-256-CBC",
        }
    }

    fn key_len(self) -> usize {
        match self {
            PemCipher::DesCbc => 8,
            PemCipher::DesEde3Cbc => 24,
            PemCipher::Aes128Cbc => 16,
            PemCipher::Aes192Cbc => 24,
            PemCipher::Aes256Cbc => 32,
        }
    }

    fn block_len(self) -> usize {
        match self {
            PemCipher::DesCbc | PemCipher::DesEde3Cbc => 8,
            _ => 16,
        }
    }

    fn decrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            PemCipher::DesCbc => cbc_decrypt::<des::Des>(key, iv, data),
            PemCipher::DesEde3Cbc => cbc_decrypt::<des::TdesEde3>(key, iv, data),
            PemCipher::Aes128Cbc => cbc_decrypt::<aes::Aes128>(key, iv, data),
            PemCipher::Aes192Cbc => cbc_decrypt::<aes::Aes192>(key, iv, data),
            PemCipher::Aes256Cbc => cbc_decrypt::<aes::Aes256>(key, iv, data),
        }
    }
}

/// Whether the block carries the legacy encryption headers
pub fn is_encrypted(block: &Pem) -> bool {
    block
        .headers()
        .get(PROC_TYPE)
        .map(|value| value.trim() == ENCRYPTED)
        .unwrap_or(false)
}

/// Decrypt the contents of an encrypted PEM block with `password`
pub fn decrypt_block(block: &Pem, password: &[u8]) -> Result<Vec<u8>> {
    if !is_encrypted(block) {
        bail!("{} block is not encrypted", block.tag());
    }

    let dek_info = block
        .headers()
        .get(DEK_INFO)
        .context("encrypted PEM block has no DEK-Info header")?;
    let (cipher_name, iv_hex) = dek_info
        .split_once(',')
        .context("malformed DEK-Info header")?;

    let cipher = PemCipher::from_name(cipher_name.trim())
        .with_context(|| format!("unsupported PEM cipher {}", cipher_name.trim()))?;
    let iv = hex::decode(iv_hex.trim()).context("DEK-Info IV is not valid hex")?;
    if iv.len() != cipher.block_len() {
        bail!(
            "DEK-Info IV for {} must be {} bytes, got {}",
            cipher.name(),
            cipher.block_len(),
            iv.len()
        );
    }

    let key = bytes_to_key(password, &iv[..8], cipher.key_len());
    cipher
        .decrypt(&key, &iv, block.contents())
        .context("incorrect password or corrupt key")
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration
fn bytes_to_key(password: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }
    key.truncate(key_len);
    key
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| anyhow::anyhow!("invalid key or IV length: {}", e))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| anyhow::anyhow!("bad padding after decryption"))
}
