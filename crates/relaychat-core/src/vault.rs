//! Vault — AES-256-GCM encryption for stored provider credentials.
//!
//! The 256-bit key is injected at construction (from [`crate::config`]);
//! there is no ambient key-file lookup. Encrypted values carry an `enc:`
//! prefix followed by base64(nonce ‖ ciphertext). Decryption failures are a
//! distinguishable [`CoreError::Crypto`] so callers can treat a broken
//! credential as "key unusable" instead of crashing the request.
//!
//! Alongside the cipher the vault derives the two display-safe projections a
//! stored credential needs: an irreversible SHA-256 fingerprint (audit/dedup)
//! and a masked preview (first and last four characters).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Prefix marking encrypted values.
const ENC_PREFIX: &str = "enc:";

/// Length of AES-256-GCM nonce (96 bits).
const NONCE_LEN: usize = 12;

/// Length of AES-256 key (256 bits).
pub const KEY_LEN: usize = 32;

/// Symmetric cipher over UTF-8 secrets.
#[derive(Clone)]
pub struct Vault {
    key: [u8; KEY_LEN],
}

impl Vault {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Build a vault from a base64-encoded 256-bit key.
    pub fn from_base64(encoded: &str) -> CoreResult<Self> {
        let bytes = B64
            .decode(encoded.trim())
            .map_err(|e| CoreError::Crypto(format!("vault key base64 decode: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(CoreError::Crypto(format!(
                "vault key has invalid length: {} (expected {KEY_LEN})",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Generate a fresh random vault and the base64 key to persist for it.
    pub fn generate() -> (Self, String) {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        (Self { key }, B64.encode(key))
    }

    fn cipher(&self) -> CoreResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CoreError::Crypto(format!("cipher init: {e}")))
    }

    /// Encrypt a plaintext secret into an `enc:...` string for storage.
    pub fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        #[allow(deprecated)]
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::Crypto(format!("encrypt: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{ENC_PREFIX}{}", B64.encode(&combined)))
    }

    /// Decrypt an `enc:...` string back to the plaintext secret.
    pub fn decrypt(&self, value: &str) -> CoreResult<String> {
        let encoded = value
            .strip_prefix(ENC_PREFIX)
            .ok_or_else(|| CoreError::Crypto("value is not vault-encrypted".into()))?;

        let combined = B64
            .decode(encoded)
            .map_err(|e| CoreError::Crypto(format!("base64 decode: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(CoreError::Crypto("encrypted value too short".into()));
        }

        let cipher = self.cipher()?;
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        #[allow(deprecated)]
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CoreError::Crypto(format!("decrypt: {e} (wrong vault key?)")))?;

        String::from_utf8(plaintext).map_err(|e| CoreError::Crypto(format!("utf8 decode: {e}")))
    }

    /// Returns `true` if the value looks like a vault-encrypted string.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }
}

/// Irreversible hex SHA-256 fingerprint of a secret.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Masked preview: first four and last four characters, middle elided.
/// Secrets too short to mask safely are fully elided.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "••••".into();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
