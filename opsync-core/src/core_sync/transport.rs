//! Remote transport contract
//!
//! The sync layer talks to the server only through `SyncTransport`.
//! Implementations own the wire protocol, authentication and retries;
//! every method here is a single attempt.
//!
//! # Architecture
//!
//! ```text
//! SyncService / KeyRotationOrchestrator
//!       |
//!       v
//! SyncTransport (trait)
//!       |
//!       +---> HTTP backend (embedding application)
//!       |
//!       +---> MockTransport (for testing)
//! ```

use super::errors::TransportResult;
use crate::core_oplog::clock::VectorClock;
use crate::core_oplog::model::Operation;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the active backend can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Backend name, for error messages
    pub provider: String,
    /// Accepts and serves individual operations
    pub supports_operation_sync: bool,
    /// Can wipe all remote data and take a replacement snapshot
    pub supports_snapshot_replacement: bool,
}

/// Per-account settings stored with the transport
#[derive(Debug, Clone, Default)]
pub struct PrivateSyncConfig {
    pub encrypt_key: Option<SecretString>,
    pub is_encryption_enabled: bool,
    /// Transport-specific fields, kept as-is
    pub extra: Map<String, Value>,
}

impl PrivateSyncConfig {
    /// Key to use for payloads, if encryption is on and a key is set
    pub fn active_key(&self) -> Option<&str> {
        if !self.is_encryption_enabled {
            return None;
        }
        self.existing_key()
    }

    /// Stored key regardless of the enabled flag
    pub fn existing_key(&self) -> Option<&str> {
        self.encrypt_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.is_empty())
    }

    /// Copy of this config with encryption on under `key`
    pub fn with_key(&self, key: &SecretString) -> Self {
        PrivateSyncConfig {
            encrypt_key: Some(key.clone()),
            is_encryption_enabled: true,
            extra: self.extra.clone(),
        }
    }
}

/// Why a snapshot is uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotReason {
    Initial,
    Recovery,
    Migration,
}

/// Full-state snapshot sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUpload {
    /// State object, or a ciphertext string when `is_encrypted`
    pub payload: Value,
    pub client_id: String,
    pub reason: SnapshotReason,
    pub vector_clock: VectorClock,
    pub schema_version: u32,
    pub is_encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUploadResponse {
    pub accepted: bool,
    #[serde(default)]
    pub server_seq: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllResponse {
    pub success: bool,
}

/// Server verdict on one uploaded operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpUploadResult {
    pub op_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub server_seq: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Refused because it is concurrent with an operation the server
    /// already holds for the same entity. The op stays pending and is
    /// resolved against that operation on the next download.
    #[serde(default)]
    pub conflict: bool,
}

/// Operation as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOperation {
    pub op: Operation,
    pub server_seq: u64,
    pub received_at: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpUploadResponse {
    pub results: Vec<OpUploadResult>,
    pub latest_seq: u64,
    /// Operations from other clients since the uploader's last known seq
    #[serde(default)]
    pub new_ops: Vec<ServerOperation>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpDownloadResponse {
    pub ops: Vec<ServerOperation>,
    pub has_more: bool,
    pub latest_seq: u64,
}

/// Remote backend used for sync and key rotation
#[async_trait]
pub trait SyncTransport: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// Upload operations in order
    async fn upload_ops(
        &self,
        ops: Vec<Operation>,
        client_id: &str,
        last_known_server_seq: u64,
    ) -> TransportResult<OpUploadResponse>;

    /// Operations after `since_seq`, excluding those authored by `exclude_client`
    async fn download_ops(
        &self,
        since_seq: u64,
        exclude_client: &str,
        limit: usize,
    ) -> TransportResult<OpDownloadResponse>;

    async fn upload_snapshot(&self, upload: SnapshotUpload) -> TransportResult<SnapshotUploadResponse>;

    /// Irreversibly delete every operation and snapshot on the server
    async fn delete_all_data(&self) -> TransportResult<DeleteAllResponse>;

    async fn load_private_cfg(&self) -> TransportResult<Option<PrivateSyncConfig>>;

    async fn set_private_cfg(&self, cfg: PrivateSyncConfig) -> TransportResult<()>;

    /// Last server sequence this device has processed
    async fn last_server_seq(&self) -> TransportResult<u64>;

    async fn set_last_server_seq(&self, seq: u64) -> TransportResult<()>;
}
