//! Error types for payload encryption

use thiserror::Error;

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Why a blob could not be decrypted
#[derive(Debug, Error)]
pub enum DecryptError {
    /// Blob is not valid base64
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Blob too short to hold salt, nonce and tag
    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    /// Tag mismatch: wrong password or tampered data
    #[error("authentication failed (wrong password or corrupted data)")]
    Authentication,

    /// Plaintext is not UTF-8
    #[error("decrypted data is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Plaintext decrypted but is not the expected JSON payload
    #[error("decrypted payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Errors from encrypting or decrypting payloads
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Argon2 rejected its parameters or input
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Any decryption failure, with its cause
    #[error("Decryption failed: {0}")]
    Decryption(#[source] DecryptError),

    /// Encrypted operation whose payload is not a ciphertext string
    #[error("Encrypted payload of operation {op_id} is not a string")]
    PayloadNotString { op_id: String },

    /// Plaintext payload could not be (de)serialized
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking crypto task panicked or was cancelled
    #[error("Crypto task failed: {0}")]
    Task(String),
}

impl CryptoError {
    /// True when the failure is a decryption failure of any kind
    pub fn is_decryption(&self) -> bool {
        matches!(self, CryptoError::Decryption(_) | CryptoError::PayloadNotString { .. })
    }
}

impl From<DecryptError> for CryptoError {
    fn from(err: DecryptError) -> Self {
        CryptoError::Decryption(err)
    }
}
