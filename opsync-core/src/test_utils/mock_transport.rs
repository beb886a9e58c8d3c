//! In-memory transport for testing
//!
//! Behaves like a snapshot-capable operation server: assigns server
//! sequence numbers and serves downloads excluding the caller's own ops.
//! Each handle is one device with its own cursor, private config and call
//! log; `peer()` connects another device to the same server. Uploads that
//! are concurrent with a stored op on the same entity are refused as
//! conflicts. Snapshot uploads can be made to fail a given number of times.

use crate::core_crypto::{AesGcmCipher, CryptoResult, PayloadCipher};
use crate::core_oplog::model::Operation;
use crate::core_oplog::now_millis;
use crate::core_sync::errors::{TransportError, TransportResult};
use crate::core_sync::transport::{
    DeleteAllResponse, OpDownloadResponse, OpUploadResponse, OpUploadResult, PrivateSyncConfig,
    ServerOperation, SnapshotUpload, SnapshotUploadResponse, SyncTransport, TransportCapabilities,
};
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Map;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Transport method invoked, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    UploadOps,
    DownloadOps,
    UploadSnapshot,
    DeleteAllData,
    LoadPrivateCfg,
    SetPrivateCfg,
    SetLastServerSeq,
}

/// Data held by the server, shared between peers
#[derive(Default)]
struct ServerState {
    ops: Vec<ServerOperation>,
    snapshots: Vec<SnapshotUpload>,
    next_seq: u64,
    reject_snapshots: usize,
    error_snapshots: usize,
    rejected_op_ids: HashSet<String>,
}

/// Data kept by one device
#[derive(Default)]
struct DeviceState {
    last_server_seq: u64,
    private_cfg: Option<PrivateSyncConfig>,
    calls: Vec<TransportCall>,
}

pub struct MockTransport {
    server: Arc<Mutex<ServerState>>,
    device: Mutex<DeviceState>,
    capabilities: TransportCapabilities,
    omit_snapshot_seq: bool,
    fail_config_load: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            server: Arc::new(Mutex::new(ServerState::default())),
            device: Mutex::new(DeviceState::default()),
            capabilities: TransportCapabilities {
                provider: "mock-supersync".to_string(),
                supports_operation_sync: true,
                supports_snapshot_replacement: true,
            },
            omit_snapshot_seq: false,
            fail_config_load: false,
        }
    }

    /// Another device connected to the same server, with its own cursor and config
    pub fn peer(&self) -> Self {
        Self {
            server: self.server.clone(),
            device: Mutex::new(DeviceState::default()),
            capabilities: self.capabilities.clone(),
            omit_snapshot_seq: self.omit_snapshot_seq,
            fail_config_load: false,
        }
    }

    /// Start with encryption enabled under `key`
    pub fn with_encrypt_key(self, key: &str) -> Self {
        self.device.lock().unwrap().private_cfg = Some(PrivateSyncConfig {
            encrypt_key: Some(SecretString::new(key.to_string())),
            is_encryption_enabled: true,
            extra: Map::new(),
        });
        self
    }

    /// Reject the next `n` snapshot uploads
    pub fn fail_snapshot_uploads(self, n: usize) -> Self {
        self.server.lock().unwrap().reject_snapshots = n;
        self
    }

    /// Return a network error for the next `n` snapshot uploads
    pub fn error_snapshot_uploads(self, n: usize) -> Self {
        self.server.lock().unwrap().error_snapshots = n;
        self
    }

    /// Reject uploads of the given operation ids
    pub fn reject_ops(self, ids: &[&str]) -> Self {
        self.server.lock().unwrap().rejected_op_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn without_snapshot_replacement(mut self) -> Self {
        self.capabilities.provider = "mock-webdav".to_string();
        self.capabilities.supports_snapshot_replacement = false;
        self
    }

    /// Accept snapshots without returning a server seq
    pub fn omit_snapshot_seq(mut self) -> Self {
        self.omit_snapshot_seq = true;
        self
    }

    pub fn fail_config_load(mut self) -> Self {
        self.fail_config_load = true;
        self
    }

    /// Store an operation as if another client had uploaded it
    pub fn seed_remote_op(&self, op: Operation) -> u64 {
        let mut server = self.server.lock().unwrap();
        server.next_seq += 1;
        let server_seq = server.next_seq;
        server.ops.push(ServerOperation { op, server_seq, received_at: now_millis() });
        server_seq
    }

    /// Calls made through this handle
    pub fn calls(&self) -> Vec<TransportCall> {
        self.device.lock().unwrap().calls.clone()
    }

    pub fn snapshots(&self) -> Vec<SnapshotUpload> {
        self.server.lock().unwrap().snapshots.clone()
    }

    pub fn server_ops(&self) -> Vec<ServerOperation> {
        self.server.lock().unwrap().ops.clone()
    }

    pub fn current_key(&self) -> Option<String> {
        self.device
            .lock()
            .unwrap()
            .private_cfg
            .as_ref()
            .and_then(|cfg| cfg.existing_key().map(str::to_string))
    }

    pub fn stored_last_server_seq(&self) -> u64 {
        self.device.lock().unwrap().last_server_seq
    }

    fn record(&self, call: TransportCall) -> MutexGuard<'_, DeviceState> {
        let mut device = self.device.lock().unwrap();
        device.calls.push(call);
        device
    }

    /// Stored op on the same entity that `op` did not see
    fn concurrent_with(server: &ServerState, op: &Operation) -> Option<String> {
        if op.op_type.is_full_state() {
            return None;
        }
        let targets = op.target_ids();
        server
            .ops
            .iter()
            .find(|s| {
                s.op.entity_type == op.entity_type
                    && targets.iter().any(|id| s.op.touches(op.entity_type, id))
                    && s.op.vector_clock.is_concurrent(&op.vector_clock)
            })
            .map(|s| s.op.id.clone())
    }

    fn ops_after(server: &ServerState, since_seq: u64, exclude_client: &str) -> Vec<ServerOperation> {
        server
            .ops
            .iter()
            .filter(|s| s.server_seq > since_seq && s.op.client_id != exclude_client)
            .cloned()
            .collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities.clone()
    }

    async fn upload_ops(
        &self,
        ops: Vec<Operation>,
        client_id: &str,
        last_known_server_seq: u64,
    ) -> TransportResult<OpUploadResponse> {
        drop(self.record(TransportCall::UploadOps));
        let mut server = self.server.lock().unwrap();
        let new_ops = Self::ops_after(&server, last_known_server_seq, client_id);

        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            if server.rejected_op_ids.contains(&op.id) {
                results.push(OpUploadResult {
                    op_id: op.id,
                    accepted: false,
                    server_seq: None,
                    error: Some("rejected by server".to_string()),
                    conflict: false,
                });
                continue;
            }
            if let Some(existing) = Self::concurrent_with(&server, &op) {
                results.push(OpUploadResult {
                    op_id: op.id,
                    accepted: false,
                    server_seq: None,
                    error: Some(format!("concurrent with {}", existing)),
                    conflict: true,
                });
                continue;
            }
            server.next_seq += 1;
            let server_seq = server.next_seq;
            results.push(OpUploadResult {
                op_id: op.id.clone(),
                accepted: true,
                server_seq: Some(server_seq),
                error: None,
                conflict: false,
            });
            server.ops.push(ServerOperation { op, server_seq, received_at: now_millis() });
        }

        Ok(OpUploadResponse { results, latest_seq: server.next_seq, new_ops })
    }

    async fn download_ops(
        &self,
        since_seq: u64,
        exclude_client: &str,
        limit: usize,
    ) -> TransportResult<OpDownloadResponse> {
        drop(self.record(TransportCall::DownloadOps));
        let server = self.server.lock().unwrap();
        let all = Self::ops_after(&server, since_seq, exclude_client);
        let has_more = all.len() > limit;
        let ops: Vec<_> = all.into_iter().take(limit).collect();
        let latest_seq = if has_more {
            ops.last().map(|s| s.server_seq).unwrap_or(since_seq)
        } else {
            server.next_seq
        };
        Ok(OpDownloadResponse { ops, has_more, latest_seq })
    }

    async fn upload_snapshot(&self, upload: SnapshotUpload) -> TransportResult<SnapshotUploadResponse> {
        drop(self.record(TransportCall::UploadSnapshot));
        let mut server = self.server.lock().unwrap();
        if server.error_snapshots > 0 {
            server.error_snapshots -= 1;
            return Err(TransportError::Network("connection reset".to_string()));
        }
        if server.reject_snapshots > 0 {
            server.reject_snapshots -= 1;
            return Ok(SnapshotUploadResponse {
                accepted: false,
                server_seq: None,
                error: Some("snapshot rejected".to_string()),
            });
        }
        server.next_seq += 1;
        let server_seq = server.next_seq;
        server.snapshots.push(upload);
        Ok(SnapshotUploadResponse {
            accepted: true,
            server_seq: (!self.omit_snapshot_seq).then_some(server_seq),
            error: None,
        })
    }

    async fn delete_all_data(&self) -> TransportResult<DeleteAllResponse> {
        drop(self.record(TransportCall::DeleteAllData));
        let mut server = self.server.lock().unwrap();
        server.ops.clear();
        server.snapshots.clear();
        server.next_seq = 0;
        Ok(DeleteAllResponse { success: true })
    }

    async fn load_private_cfg(&self) -> TransportResult<Option<PrivateSyncConfig>> {
        let device = self.record(TransportCall::LoadPrivateCfg);
        if self.fail_config_load {
            return Err(TransportError::Server("config unavailable".to_string()));
        }
        Ok(device.private_cfg.clone())
    }

    async fn set_private_cfg(&self, cfg: PrivateSyncConfig) -> TransportResult<()> {
        self.record(TransportCall::SetPrivateCfg).private_cfg = Some(cfg);
        Ok(())
    }

    async fn last_server_seq(&self) -> TransportResult<u64> {
        Ok(self.device.lock().unwrap().last_server_seq)
    }

    async fn set_last_server_seq(&self, seq: u64) -> TransportResult<()> {
        self.record(TransportCall::SetLastServerSeq).last_server_seq = seq;
        Ok(())
    }
}

/// Real cipher that counts how often it encrypts
#[derive(Default)]
pub struct CountingCipher {
    encrypts: AtomicUsize,
    decrypts: AtomicUsize,
}

impl CountingCipher {
    pub fn encrypt_calls(&self) -> usize {
        self.encrypts.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypts.load(Ordering::SeqCst)
    }
}

impl PayloadCipher for CountingCipher {
    fn encrypt(&self, data: &str, password: &str) -> CryptoResult<String> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        AesGcmCipher.encrypt(data, password)
    }

    fn decrypt(&self, blob: &str, password: &str) -> CryptoResult<String> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        AesGcmCipher.decrypt(blob, password)
    }
}

