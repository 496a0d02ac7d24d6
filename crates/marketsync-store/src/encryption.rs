//! Credential vault: AES-256-GCM for provider credential blobs at rest.
//!
//! Blob format: `base64(nonce || ciphertext || tag)`, a single string stored
//! verbatim in `tenant_integrations.encrypted_credentials`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value as JsonValue;
use std::fmt;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("invalid key length: expected {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),

    #[error("base64 decode failed: {0}")]
    Base64(String),

    // Wrong key and tampered payload are reported identically.
    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("malformed credential payload: {0}")]
    MalformedPayload(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

fn cipher_for(key: &[u8]) -> VaultResult<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(VaultError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::InvalidKeyLength(key.len()))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> VaultResult<String> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|_| VaultError::Encryption)?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);

    Ok(general_purpose::STANDARD.encode(payload))
}

/// Decrypt a blob produced by [`encrypt`]
pub fn decrypt(blob: &str, key: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let payload = general_purpose::STANDARD
        .decode(blob.trim())
        .map_err(|e| VaultError::Base64(e.to_string()))?;

    if payload.len() < NONCE_SIZE {
        return Err(VaultError::CiphertextTooShort(payload.len()));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| VaultError::Decryption)
}

/// Process-wide vault holding the configured master key
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; KEY_SIZE],
}

impl CredentialVault {
    pub fn new(key: &[u8]) -> VaultResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(VaultError::InvalidKeyLength(key.len()));
        }
        let mut buf = [0u8; KEY_SIZE];
        buf.copy_from_slice(key);
        Ok(Self { key: buf })
    }

    /// Build from the 64-character hex form used in configuration
    pub fn from_hex(hex_key: &str) -> VaultResult<Self> {
        let bytes =
            hex::decode(hex_key.trim()).map_err(|e| VaultError::InvalidKeyEncoding(e.to_string()))?;
        Self::new(&bytes)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<String> {
        encrypt(plaintext, &self.key)
    }

    pub fn decrypt(&self, blob: &str) -> VaultResult<Vec<u8>> {
        decrypt(blob, &self.key)
    }

    pub fn encrypt_json(&self, value: &JsonValue) -> VaultResult<String> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| VaultError::MalformedPayload(e.to_string()))?;
        self.encrypt(&bytes)
    }

    /// Decrypt a credential blob and parse it as a JSON object
    pub fn decrypt_json(&self, blob: &str) -> VaultResult<JsonValue> {
        let bytes = self.decrypt(blob)?;
        let value: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::MalformedPayload(e.to_string()))?;
        if !value.is_object() {
            return Err(VaultError::MalformedPayload("expected a JSON object".to_string()));
        }
        Ok(value)
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").field("key", &"***").finish()
    }
}
