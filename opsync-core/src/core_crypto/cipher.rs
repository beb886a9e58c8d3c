/*
    cipher.rs - Password-based authenticated encryption of strings

    Blob format (base64, standard alphabet):

        salt (16) | nonce (12) | ciphertext | GCM tag (16)

    Key = Argon2id(password, salt), 64 MiB, 3 passes, 1 lane, 32 bytes.
    Cipher = AES-256-GCM. Salt and nonce are fresh for every call.

    Older clients wrote `nonce (12) | ciphertext | tag` with a key from
    PBKDF2-HMAC-SHA256 over the password, salted with the password itself,
    1000 rounds. `decrypt` falls back to that derivation when the current
    one fails. Nothing new is ever written in the legacy format.
*/

use super::errors::{CryptoError, CryptoResult, DecryptError};
use crate::metrics::{record_counter, CRYPTO_DECRYPT_LEGACY, CRYPTO_DECRYPT_TOTAL, CRYPTO_ENCRYPT_TOTAL};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Argon2id parameters
const ARGON2_MEM_COST_KIB: u32 = 65536; // 64 MiB
const ARGON2_TIME_COST: u32 = 3;
const ARGON2_PARALLELISM: u32 = 1;

const LEGACY_PBKDF2_ROUNDS: u32 = 1000;

/// Encryption seam, so callers can substitute or count invocations
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, data: &str, password: &str) -> CryptoResult<String>;
    fn decrypt(&self, blob: &str, password: &str) -> CryptoResult<String>;
}

/// AES-256-GCM with Argon2id keys and the legacy read path
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl PayloadCipher for AesGcmCipher {
    fn encrypt(&self, data: &str, password: &str) -> CryptoResult<String> {
        encrypt(data, password)
    }

    fn decrypt(&self, blob: &str, password: &str) -> CryptoResult<String> {
        decrypt(blob, password)
    }
}

fn derive_key(password: &str, salt: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(ARGON2_MEM_COST_KIB, ARGON2_TIME_COST, ARGON2_PARALLELISM, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

fn derive_legacy_key(password: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        password.as_bytes(),
        LEGACY_PBKDF2_ROUNDS,
        key.as_mut(),
    );
    key
}

fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

fn open(key: &[u8; KEY_LEN], nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| DecryptError::Authentication)
}

/// Encrypt `data` under `password`, returning a base64 blob
pub fn encrypt(data: &str, password: &str) -> CryptoResult<String> {
    let mut rng = rand::rng();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let sealed = seal(&key, &nonce, data.as_bytes())?;

    let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);

    record_counter(CRYPTO_ENCRYPT_TOTAL, 1);
    Ok(STANDARD.encode(blob))
}

/// Decrypt a blob produced by `encrypt`, or by the legacy format
pub fn decrypt(blob: &str, password: &str) -> CryptoResult<String> {
    let bytes = STANDARD.decode(blob.trim()).map_err(DecryptError::from)?;
    record_counter(CRYPTO_DECRYPT_TOTAL, 1);

    let modern = decrypt_modern(&bytes, password);
    let plaintext = match modern {
        Ok(plaintext) => plaintext,
        Err(CryptoError::Decryption(modern_err)) => match decrypt_legacy(&bytes, password) {
            Ok(plaintext) => {
                tracing::debug!("Decrypted payload with legacy key derivation");
                record_counter(CRYPTO_DECRYPT_LEGACY, 1);
                plaintext
            }
            // Report the failure of the current format
            Err(_) => return Err(CryptoError::Decryption(modern_err)),
        },
        Err(other) => return Err(other),
    };

    String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.into()))
}

fn decrypt_modern(bytes: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    if bytes.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(DecryptError::TooShort(bytes.len()).into());
    }
    let (salt, rest) = bytes.split_at(SALT_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);
    let key = derive_key(password, salt)?;
    Ok(open(&key, nonce, sealed)?)
}

fn decrypt_legacy(bytes: &[u8], password: &str) -> Result<Vec<u8>, DecryptError> {
    if bytes.len() < NONCE_LEN + TAG_LEN {
        return Err(DecryptError::TooShort(bytes.len()));
    }
    let (nonce, sealed) = bytes.split_at(NONCE_LEN);
    open(&derive_legacy_key(password), nonce, sealed)
}

/// Write a blob in the legacy format, for compatibility tests only
#[cfg(test)]
pub(crate) fn encrypt_legacy(data: &str, password: &str) -> CryptoResult<String> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    let sealed = seal(&derive_legacy_key(password), &nonce, data.as_bytes())?;
    let mut blob = nonce.to_vec();
    blob.extend_from_slice(&sealed);
    Ok(STANDARD.encode(blob))
}
