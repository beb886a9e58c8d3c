//! Payload encryption
//!
//! Password-derived AES-256-GCM for operation payloads and full-state
//! snapshots, with a read-only path for the legacy PBKDF2 format.

pub mod cipher;
pub mod errors;
pub mod operation_crypto;

pub use cipher::{decrypt, encrypt, AesGcmCipher, PayloadCipher};
pub use errors::{CryptoError, CryptoResult, DecryptError};
pub use operation_crypto::OperationEncryptor;
