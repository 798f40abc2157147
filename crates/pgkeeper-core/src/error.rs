use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored credential could not be decoded (bad base64, short nonce,
    /// or authentication tag mismatch).
    #[error("Credential decode error: {0}")]
    CredentialDecode(String),

    #[error("Credential encode error: {0}")]
    CredentialEncode(String),

    /// The configured encryption key is not a base64-encoded 32-byte key.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

impl CoreError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::CredentialDecode(_) => "CREDENTIAL_DECODE_ERROR",
            CoreError::CredentialEncode(_) => "CREDENTIAL_ENCODE_ERROR",
            CoreError::InvalidKey(_) => "INVALID_KEY",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
