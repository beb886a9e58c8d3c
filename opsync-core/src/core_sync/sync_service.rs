/*
    sync_service.rs - Incremental upload and download of operations

    Upload:
    1. Unsynced local ops, oldest first, in batches
    2. Encrypt payloads when encryption is enabled
    3. Accepted ops are marked synced, rejected ones marked rejected.
       Ops refused as concurrent stay pending for conflict resolution.
    4. Ops piggybacked on the response go through the download path
    5. Store the server's latest sequence

    Download:
    1. Fetch ops after the last processed server sequence
    2. Decode to the current schema (ops from newer clients are skipped),
       decrypt, drop ops already in the log
    3. Split into clean ops and LWW conflicts with pending local ops
    4. Append as remote, fold them into state in one pass, then apply
       the LWW updates of conflicts this device won
    5. Merge their clocks, then store the server sequence

    A full sync downloads first, so local edits are resolved against what
    other devices wrote before they are sent. Nothing here retries. A
    failed call leaves the cursor where it was, so the next sync picks up
    the same operations again.
*/

use super::errors::{SyncError, SyncResult};
use super::transport::{PrivateSyncConfig, ServerOperation, SyncTransport};
use crate::core_crypto::OperationEncryptor;
use crate::core_oplog::apply::{detect_conflicts, resolve_conflict, LwwWinner, StateContainer};
use crate::core_oplog::clock::VectorClockTracker;
use crate::core_oplog::model::{decode_operation_with, Operation};
use crate::core_oplog::store::{OpSource, OperationLogStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Default number of operations per upload request and download page
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub rejected: usize,
    /// Refused as concurrent with a server op, left pending
    pub conflicted: usize,
    /// Remote ops received with the upload response
    pub piggybacked: DownloadSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub received: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub conflicts: usize,
    pub local_wins: usize,
    /// Ops with a schema version this client cannot read, never stored
    pub unsupported: usize,
}

impl DownloadSummary {
    fn absorb(&mut self, other: DownloadSummary) {
        self.received += other.received;
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.conflicts += other.conflicts;
        self.local_wins += other.local_wins;
        self.unsupported += other.unsupported;
    }
}

pub struct SyncService {
    client_id: String,
    transport: Arc<dyn SyncTransport>,
    store: Arc<OperationLogStore>,
    tracker: Arc<VectorClockTracker>,
    container: Arc<StateContainer>,
    encryptor: OperationEncryptor,
    batch_size: usize,
}

impl SyncService {
    pub fn new(
        client_id: impl Into<String>,
        transport: Arc<dyn SyncTransport>,
        store: Arc<OperationLogStore>,
        tracker: Arc<VectorClockTracker>,
        container: Arc<StateContainer>,
    ) -> Self {
        SyncService {
            client_id: client_id.into(),
            transport,
            store,
            tracker,
            container,
            encryptor: OperationEncryptor::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_encryptor(mut self, encryptor: OperationEncryptor) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Download what others wrote, then upload what is still pending
    pub async fn sync(&self, cfg: &PrivateSyncConfig) -> SyncResult<(UploadSummary, DownloadSummary)> {
        let download = self.download_remote_ops(cfg).await?;
        let upload = self.upload_pending_ops(cfg).await?;
        Ok((upload, download))
    }

    pub async fn upload_pending_ops(&self, cfg: &PrivateSyncConfig) -> SyncResult<UploadSummary> {
        let mut summary = UploadSummary::default();
        let pending = self.store.get_unsynced()?;
        if pending.is_empty() {
            tracing::debug!("No pending operations to upload");
            return Ok(summary);
        }
        if cfg.is_encryption_enabled && cfg.active_key().is_none() {
            return Err(SyncError::MissingEncryptionKey);
        }

        for chunk in pending.chunks(self.batch_size) {
            let seq_by_id: HashMap<&str, u64> =
                chunk.iter().map(|e| (e.op.id.as_str(), e.seq)).collect();
            let ops: Vec<Operation> = chunk.iter().map(|e| e.op.clone()).collect();
            let ops = match cfg.active_key() {
                Some(key) => self.encryptor.encrypt_operations(ops, key).await?,
                None => ops,
            };

            let last_seq = self.transport.last_server_seq().await?;
            let response = self.transport.upload_ops(ops, &self.client_id, last_seq).await?;

            let mut synced = Vec::new();
            let mut rejected = Vec::new();
            for result in &response.results {
                match (result.accepted, seq_by_id.get(result.op_id.as_str())) {
                    (true, Some(seq)) => synced.push(*seq),
                    (false, Some(_)) if result.conflict => {
                        tracing::info!(op_id = %result.op_id, "Upload refused as concurrent, keeping it pending");
                        summary.conflicted += 1;
                    }
                    (false, Some(_)) => {
                        tracing::warn!(
                            op_id = %result.op_id,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "Server rejected operation"
                        );
                        rejected.push(result.op_id.clone());
                    }
                    (_, None) => {
                        tracing::warn!(op_id = %result.op_id, "Upload result for unknown operation");
                    }
                }
            }
            self.store.mark_synced(&synced)?;
            self.store.mark_rejected(&rejected)?;
            summary.uploaded += synced.len();
            summary.rejected += rejected.len();

            if !response.new_ops.is_empty() {
                let piggybacked = self.apply_remote(response.new_ops, cfg).await?;
                summary.piggybacked.absorb(piggybacked);
            }
            self.transport.set_last_server_seq(response.latest_seq).await?;
        }

        tracing::info!(
            uploaded = summary.uploaded,
            rejected = summary.rejected,
            conflicted = summary.conflicted,
            piggybacked = summary.piggybacked.received,
            "Uploaded pending operations"
        );
        Ok(summary)
    }

    pub async fn download_remote_ops(&self, cfg: &PrivateSyncConfig) -> SyncResult<DownloadSummary> {
        let mut summary = DownloadSummary::default();
        loop {
            let since = self.transport.last_server_seq().await?;
            let page = self
                .transport
                .download_ops(since, &self.client_id, self.batch_size)
                .await?;

            let page_summary = self.apply_remote(page.ops, cfg).await?;
            summary.absorb(page_summary);
            if page.latest_seq > since {
                self.transport.set_last_server_seq(page.latest_seq).await?;
            }
            if !page.has_more || page.latest_seq <= since {
                break;
            }
        }

        if summary.received > 0 {
            tracing::info!(
                received = summary.received,
                applied = summary.applied,
                conflicts = summary.conflicts,
                local_wins = summary.local_wins,
                "Downloaded remote operations"
            );
        }
        Ok(summary)
    }

    /// Bring server operations to the current schema version.
    ///
    /// Operations written by a newer client are dropped with an error log;
    /// storing them would make the log unreadable on the next open.
    fn decode_server_ops(&self, server_ops: Vec<ServerOperation>) -> Vec<Operation> {
        server_ops
            .into_iter()
            .filter_map(|server_op| {
                let decoded = serde_json::to_value(&server_op.op)
                    .map_err(StoreError::from)
                    .and_then(|value| decode_operation_with(value, self.store.aliases()));
                match decoded {
                    Ok(op) => Some(op),
                    Err(e) => {
                        tracing::error!(
                            op_id = %server_op.op.id,
                            server_seq = server_op.server_seq,
                            schema_version = server_op.op.schema_version,
                            error = %e,
                            "Skipping remote operation this client cannot decode"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Store, resolve and apply a batch of server operations
    async fn apply_remote(
        &self,
        server_ops: Vec<ServerOperation>,
        cfg: &PrivateSyncConfig,
    ) -> SyncResult<DownloadSummary> {
        let mut summary = DownloadSummary { received: server_ops.len(), ..Default::default() };
        if server_ops.is_empty() {
            return Ok(summary);
        }

        let ops = self.decode_server_ops(server_ops);
        summary.unsupported = summary.received - ops.len();
        if ops.is_empty() {
            return Ok(summary);
        }
        let ops = if ops.iter().any(|op| op.is_payload_encrypted) {
            let key = cfg.existing_key().ok_or(SyncError::MissingEncryptionKey)?;
            self.encryptor.decrypt_operations(ops, key).await?
        } else {
            ops
        };

        let new_ops = self.store.filter_new_ops(ops)?;
        summary.duplicates = summary.received - summary.unsupported - new_ops.len();
        if new_ops.is_empty() {
            return Ok(summary);
        }
        let all_clocks: Vec<_> = new_ops.iter().map(|op| op.vector_clock.clone()).collect();

        let pending = self.store.get_unsynced_by_entity()?;
        let scan = detect_conflicts(new_ops.clone(), &pending);
        summary.conflicts = scan.conflicts.len();

        let mut apply_ids: HashSet<String> = scan.clean.iter().map(|op| op.id.clone()).collect();
        let mut rejected_local = Vec::new();
        let mut local_wins = Vec::new();

        if !scan.conflicts.is_empty() {
            let state = self.container.state()?;
            let mut clock = self.tracker.current_clock()?;
            for conflict in scan.conflicts {
                let resolution = resolve_conflict(conflict, &state, &self.client_id, &clock);
                apply_ids.extend(resolution.remote_to_apply.iter().map(|op| op.id.clone()));
                rejected_local.extend(resolution.rejected_local);
                if let Some(op) = resolution.new_local_op {
                    debug_assert_eq!(resolution.winner, LwwWinner::Local);
                    // Later local wins in this batch must dominate this one too
                    clock.merge(&op.vector_clock);
                    local_wins.push(op);
                }
            }
        }

        // Every new remote op is kept; only the applied ones reach state
        let seqs = self.store.append_batch(new_ops.clone(), OpSource::Remote)?;
        let (to_apply, applied_seqs): (Vec<Operation>, Vec<u64>) = new_ops
            .into_iter()
            .zip(seqs)
            .filter(|(op, _)| apply_ids.contains(&op.id))
            .unzip();

        self.container.bulk_apply(&to_apply)?;
        self.store.mark_applied(&applied_seqs)?;
        self.store.mark_rejected(&rejected_local)?;
        self.tracker.merge_all(all_clocks.iter())?;

        for op in &local_wins {
            self.store.append_with_clock(op.clone(), OpSource::Local, &op.vector_clock)?;
            self.tracker.observe(&op.vector_clock)?;
        }
        if !local_wins.is_empty() {
            self.container.bulk_apply(&local_wins)?;
        }

        summary.applied = to_apply.len();
        summary.local_wins = local_wins.len();
        Ok(summary)
    }
}
