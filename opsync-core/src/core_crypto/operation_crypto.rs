/*
    operation_crypto.rs - Encryption of operation and snapshot payloads

    An encrypted operation carries its JSON-stringified payload as a
    ciphertext string and has `isPayloadEncrypted` set. Everything else on
    the operation (ids, clock, types) stays in the clear so the server can
    order and route it.

    Batch variants run the key derivation on the blocking pool, a few at a
    time, and return results in input order.
*/

use super::cipher::{AesGcmCipher, PayloadCipher};
use super::errors::{CryptoError, CryptoResult, DecryptError};
use crate::core_oplog::model::Operation;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;

/// Encrypts operations and snapshots with one cipher
#[derive(Clone)]
pub struct OperationEncryptor {
    cipher: Arc<dyn PayloadCipher>,
    concurrency: usize,
}

impl Default for OperationEncryptor {
    fn default() -> Self {
        Self::new(Arc::new(AesGcmCipher))
    }
}

impl OperationEncryptor {
    pub fn new(cipher: Arc<dyn PayloadCipher>) -> Self {
        let concurrency = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        OperationEncryptor { cipher, concurrency }
    }

    /// Limit the number of payloads processed at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn cipher(&self) -> &Arc<dyn PayloadCipher> {
        &self.cipher
    }

    /// Encrypt one operation's payload. Already encrypted ops pass through.
    pub fn encrypt_operation(&self, op: &Operation, password: &str) -> CryptoResult<Operation> {
        if op.is_payload_encrypted {
            return Ok(op.clone());
        }
        let plaintext = serde_json::to_string(&op.payload)?;
        let mut encrypted = op.clone();
        encrypted.payload = Value::String(self.cipher.encrypt(&plaintext, password)?);
        encrypted.is_payload_encrypted = true;
        Ok(encrypted)
    }

    /// Decrypt one operation's payload. Plaintext ops pass through.
    pub fn decrypt_operation(&self, op: &Operation, password: &str) -> CryptoResult<Operation> {
        if !op.is_payload_encrypted {
            return Ok(op.clone());
        }
        let Value::String(blob) = &op.payload else {
            return Err(CryptoError::PayloadNotString { op_id: op.id.clone() });
        };
        let plaintext = self.cipher.decrypt(blob, password)?;
        let mut decrypted = op.clone();
        decrypted.payload = serde_json::from_str(&plaintext).map_err(DecryptError::Payload)?;
        decrypted.is_payload_encrypted = false;
        Ok(decrypted)
    }

    pub async fn encrypt_operations(
        &self,
        ops: Vec<Operation>,
        password: &str,
    ) -> CryptoResult<Vec<Operation>> {
        self.map_blocking(ops, password, |this, op, pw| this.encrypt_operation(&op, pw))
            .await
    }

    pub async fn decrypt_operations(
        &self,
        ops: Vec<Operation>,
        password: &str,
    ) -> CryptoResult<Vec<Operation>> {
        self.map_blocking(ops, password, |this, op, pw| this.decrypt_operation(&op, pw))
            .await
    }

    /// Encrypt an arbitrary JSON value, e.g. a full-state snapshot
    pub fn encrypt_payload(&self, payload: &Value, password: &str) -> CryptoResult<String> {
        let plaintext = serde_json::to_string(payload)?;
        self.cipher.encrypt(&plaintext, password)
    }

    pub fn decrypt_payload(&self, blob: &str, password: &str) -> CryptoResult<Value> {
        let plaintext = self.cipher.decrypt(blob, password)?;
        Ok(serde_json::from_str(&plaintext).map_err(DecryptError::Payload)?)
    }

    async fn map_blocking<F>(
        &self,
        ops: Vec<Operation>,
        password: &str,
        f: F,
    ) -> CryptoResult<Vec<Operation>>
    where
        F: Fn(&OperationEncryptor, Operation, &str) -> CryptoResult<Operation>
            + Send
            + Sync
            + Copy
            + 'static,
    {
        let password: Arc<str> = Arc::from(password);
        stream::iter(ops)
            .map(|op| {
                let this = self.clone();
                let password = password.clone();
                async move {
                    tokio::task::spawn_blocking(move || f(&this, op, &password))
                        .await
                        .map_err(|e| CryptoError::Task(e.to_string()))?
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}
