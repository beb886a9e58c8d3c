/*
    key_rotation.rs - Encryption password change for the remote corpus

    Replaces everything on the server with one snapshot encrypted under a
    new password. Steps run strictly in this order:

    1. Read the remote private config to keep the OLD password (best effort)
    2. Collect local state, vector clock and client id (abort if no client id)
    3. Delete all remote data                      <- point of no return
    4. Upload the state encrypted with the NEW password as a recovery snapshot
       - accepted: save the new password locally, store the server seq
       - rejected or failed: go to 5
    5. Re-encrypt with the OLD password and upload once more
       - accepted: rolled back, password unchanged
       - otherwise, or no OLD password: critical, remote state indeterminate

    Not reentrant. Callers must keep invocations from overlapping.
*/

use super::errors::KeyRotationError;
use super::transport::{PrivateSyncConfig, SnapshotReason, SnapshotUpload, SyncTransport};
use crate::core_crypto::OperationEncryptor;
use crate::core_oplog::apply::StateContainer;
use crate::core_oplog::clock::{VectorClock, VectorClockTracker};
use crate::core_oplog::model::{AppState, CURRENT_SCHEMA_VERSION};
use crate::core_oplog::store::errors::StoreResult;
use crate::metrics::{record_outcome, KEY_ROTATION_OUTCOME};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;

/// Source of the complete local state
pub trait StateSource: Send + Sync {
    fn snapshot_state(&self) -> StoreResult<AppState>;
}

impl StateSource for StateContainer {
    fn snapshot_state(&self) -> StoreResult<AppState> {
        Ok(self.state()?.as_ref().clone())
    }
}

/// Source of this device's client id
pub trait ClientIdProvider: Send + Sync {
    fn client_id(&self) -> Option<String>;
}

/// Client id known up front
#[derive(Debug, Clone, Default)]
pub struct StaticClientId(pub Option<String>);

impl ClientIdProvider for StaticClientId {
    fn client_id(&self) -> Option<String> {
        self.0.clone().filter(|id| !id.is_empty())
    }
}

/// Result of a successful rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRotationSummary {
    /// Server sequence of the new snapshot, if the server sent one
    pub server_seq: Option<u64>,
}

/// Everything the upload steps need, captured before deletion
struct Prepared {
    client_id: String,
    state: Value,
    clock: VectorClock,
}

pub struct KeyRotationOrchestrator {
    transport: Arc<dyn SyncTransport>,
    state: Arc<dyn StateSource>,
    tracker: Arc<VectorClockTracker>,
    client_ids: Arc<dyn ClientIdProvider>,
    encryptor: OperationEncryptor,
}

impl KeyRotationOrchestrator {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        state: Arc<dyn StateSource>,
        tracker: Arc<VectorClockTracker>,
        client_ids: Arc<dyn ClientIdProvider>,
        encryptor: OperationEncryptor,
    ) -> Self {
        KeyRotationOrchestrator {
            transport,
            state,
            tracker,
            client_ids,
            encryptor,
        }
    }

    /// Re-encrypt all remote data under `new_password`.
    ///
    /// Returns one of the four terminal outcomes: success, rolled back,
    /// critical without recovery, critical with failed recovery. Errors
    /// raised before step 3 leave remote data untouched.
    pub async fn change_password(
        &self,
        new_password: &SecretString,
    ) -> Result<KeyRotationSummary, KeyRotationError> {
        let result = self.run(new_password).await;
        let label = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        record_outcome(KEY_ROTATION_OUTCOME, label);
        result
    }

    async fn run(&self, new_password: &SecretString) -> Result<KeyRotationSummary, KeyRotationError> {
        let caps = self.transport.capabilities();
        if !caps.supports_operation_sync || !caps.supports_snapshot_replacement {
            tracing::warn!(provider = %caps.provider, "Password change rejected for unsupported transport");
            return Err(KeyRotationError::UnsupportedTransport { provider: caps.provider });
        }

        // Step 1
        let existing_cfg = match self.transport.load_private_cfg().await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read private sync config, rollback will be unavailable");
                None
            }
        };
        let old_password = existing_cfg
            .as_ref()
            .and_then(PrivateSyncConfig::existing_key)
            .map(|k| SecretString::new(k.to_string()));
        tracing::info!(has_old_password = old_password.is_some(), "Starting encryption password change");

        // Step 2
        let prepared = self.prepare()?;

        // Step 3
        tracing::info!("Deleting all remote data");
        match self.transport.delete_all_data().await {
            Ok(resp) if resp.success => {}
            Ok(_) => {
                return Err(KeyRotationError::DeleteFailed("server reported failure".to_string()))
            }
            Err(e) => return Err(KeyRotationError::DeleteFailed(e.to_string())),
        }

        // Step 4
        tracing::info!(client_id = %prepared.client_id, "Uploading snapshot encrypted with new password");
        let cause = match self.upload_encrypted(&prepared, new_password).await {
            Ok(server_seq) => {
                return self.commit(existing_cfg.unwrap_or_default(), new_password, server_seq).await;
            }
            Err(cause) => cause,
        };
        tracing::error!(cause = %cause, "Snapshot upload with new password failed after remote deletion");

        // Step 5
        let Some(old_password) = old_password else {
            tracing::error!("No previous password available, remote data cannot be restored");
            return Err(KeyRotationError::CriticalNoRecovery { cause });
        };

        tracing::info!("Restoring remote data with the old password");
        match self.upload_encrypted(&prepared, &old_password).await {
            Ok(server_seq) => {
                self.store_server_seq(server_seq).await;
                tracing::warn!("Password change rolled back, remote data restored with old password");
                Err(KeyRotationError::RolledBack { cause })
            }
            Err(recovery_cause) => {
                tracing::error!(
                    cause = %cause,
                    recovery_cause = %recovery_cause,
                    "Restoring remote data with old password failed"
                );
                Err(KeyRotationError::CriticalRecoveryFailed { cause, recovery_cause })
            }
        }
    }

    fn prepare(&self) -> Result<Prepared, KeyRotationError> {
        let client_id = self.client_ids.client_id().ok_or(KeyRotationError::MissingClientId)?;
        let state = self
            .state
            .snapshot_state()
            .and_then(|s| Ok(s.to_value()?))
            .map_err(|e| KeyRotationError::StateUnavailable(e.to_string()))?;
        let clock = self
            .tracker
            .current_clock()
            .map_err(|e| KeyRotationError::StateUnavailable(e.to_string()))?;
        Ok(Prepared { client_id, state, clock })
    }

    /// Encrypt and upload the snapshot. Any failure becomes its cause text.
    async fn upload_encrypted(
        &self,
        prepared: &Prepared,
        password: &SecretString,
    ) -> Result<Option<u64>, String> {
        let encryptor = self.encryptor.clone();
        let state = prepared.state.clone();
        let password = password.clone();
        let blob = tokio::task::spawn_blocking(move || {
            encryptor.encrypt_payload(&state, password.expose_secret())
        })
        .await
        .map_err(|e| format!("encryption task failed: {}", e))?
        .map_err(|e| e.to_string())?;

        let upload = SnapshotUpload {
            payload: Value::String(blob),
            client_id: prepared.client_id.clone(),
            reason: SnapshotReason::Recovery,
            vector_clock: prepared.clock.clone(),
            schema_version: CURRENT_SCHEMA_VERSION,
            is_encrypted: true,
        };

        match self.transport.upload_snapshot(upload).await {
            Ok(resp) if resp.accepted => Ok(resp.server_seq),
            Ok(resp) => Err(resp.error.unwrap_or_else(|| "snapshot rejected by server".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn commit(
        &self,
        existing_cfg: PrivateSyncConfig,
        new_password: &SecretString,
        server_seq: Option<u64>,
    ) -> Result<KeyRotationSummary, KeyRotationError> {
        self.transport
            .set_private_cfg(existing_cfg.with_key(new_password))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Saving the new password locally failed");
                KeyRotationError::ConfigUpdateFailed(e.to_string())
            })?;
        self.store_server_seq(server_seq).await;
        tracing::info!(?server_seq, "Encryption password changed");
        Ok(KeyRotationSummary { server_seq })
    }

    async fn store_server_seq(&self, server_seq: Option<u64>) {
        match server_seq {
            Some(seq) => {
                if let Err(e) = self.transport.set_last_server_seq(seq).await {
                    tracing::error!(seq, error = %e, "Storing server sequence after snapshot upload failed");
                }
            }
            None => {
                tracing::error!("Snapshot accepted without a server sequence, incremental sync may re-download data");
            }
        }
    }
}
