//! Credential codec: AES-256-GCM over datasource passwords.
//!
//! Wire form is `base64(nonce || ciphertext || tag)` with a random 96-bit
//! nonce per encryption. The key is handed in by the caller; nothing here
//! reads the environment.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CoreError, Result};

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct CredentialCodec {
    cipher: Aes256Gcm,
}

impl CredentialCodec {
    /// Build a codec from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key_b64.trim())
            .map_err(|e| CoreError::InvalidKey(format!("not valid base64: {e}")))?;
        Self::from_key_bytes(&bytes)
    }

    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            CoreError::InvalidKey(format!("expected 32 bytes, got {}", key.len()))
        })?;
        Ok(Self { cipher })
    }

    /// Fresh random key, base64-encoded, suitable for `security.encryption_key`.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        STANDARD.encode(key)
    }

    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| CoreError::CredentialEncode(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::CredentialDecode(format!("not valid base64: {e}")))?;
        if data.len() < NONCE_LEN {
            return Err(CoreError::CredentialDecode("invalid nonce".to_string()));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CoreError::CredentialDecode("authentication failed".to_string()))?;
        String::from_utf8(plain)
            .map_err(|e| CoreError::CredentialDecode(format!("not valid UTF-8: {e}")))
    }
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCodec(<key redacted>)")
    }
}
