//! Error types for remote sync and key rotation

use crate::core_crypto::CryptoError;
use crate::core_oplog::store::errors::StoreError;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for transport calls
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures reported by a transport implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request could not be completed
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with an error
    #[error("Server error: {0}")]
    Server(String),

    /// Backend cannot do what was asked
    #[error("Unsupported by transport: {0}")]
    Unsupported(String),

    /// Credentials missing or refused
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// Errors from incremental upload and download
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Encryption is on, or encrypted ops arrived, but there is no key
    #[error("Encrypted operations require an encryption key, but none is configured")]
    MissingEncryptionKey,
}

/// Terminal failures of a password change.
///
/// Every variant says what happened to remote and local data, because
/// the user has to act on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyRotationError {
    /// Nothing was changed
    #[error(
        "Changing the encryption password needs a sync backend that supports operation sync \
         and server-side snapshot replacement (active: {provider}). Nothing was changed."
    )]
    UnsupportedTransport { provider: String },

    /// Nothing was changed
    #[error("Cannot change the encryption password: this device has no client id yet. Nothing was changed.")]
    MissingClientId,

    /// Nothing was changed
    #[error("Cannot change the encryption password: reading local state failed: {0}. Nothing was changed.")]
    StateUnavailable(String),

    /// The server did not confirm the deletion
    #[error(
        "Deleting remote data failed: {0}. The password was not changed; \
         run a sync to check the remote state."
    )]
    DeleteFailed(String),

    /// Upload failed, restore with the old password succeeded
    #[error(
        "Changing the encryption password failed ({cause}). Remote data was restored with the old \
         password. Password unchanged, local data intact."
    )]
    RolledBack { cause: String },

    /// Upload failed and there was no old password to restore with
    #[error(
        "CRITICAL: changing the encryption password failed after remote data was deleted ({cause}), \
         and no previous password was available to restore it. Local data is intact, remote data \
         is empty. A full re-sync from this device is required."
    )]
    CriticalNoRecovery { cause: String },

    /// Upload failed and restoring with the old password failed too
    #[error(
        "CRITICAL: changing the encryption password failed after remote data was deleted ({cause}), \
         and remote data could not be restored with the old password ({recovery_cause}). Local \
         data is intact, remote state is unknown. A full re-sync from this device is required."
    )]
    CriticalRecoveryFailed { cause: String, recovery_cause: String },

    /// Remote now uses the new password but it was not saved locally
    #[error(
        "Remote data was re-encrypted with the new password, but saving it locally failed: {0}. \
         Enter the new password again on this device."
    )]
    ConfigUpdateFailed(String),
}

impl KeyRotationError {
    /// True for outcomes that need a manual full re-sync
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            KeyRotationError::CriticalNoRecovery { .. } | KeyRotationError::CriticalRecoveryFailed { .. }
        )
    }

    /// Metric label for this outcome
    pub fn outcome_label(&self) -> &'static str {
        match self {
            KeyRotationError::UnsupportedTransport { .. } => "unsupported_transport",
            KeyRotationError::MissingClientId => "missing_client_id",
            KeyRotationError::StateUnavailable(_) => "state_unavailable",
            KeyRotationError::DeleteFailed(_) => "delete_failed",
            KeyRotationError::RolledBack { .. } => "rolled_back",
            KeyRotationError::CriticalNoRecovery { .. } => "critical_no_recovery",
            KeyRotationError::CriticalRecoveryFailed { .. } => "critical_recovery_failed",
            KeyRotationError::ConfigUpdateFailed(_) => "config_update_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinguishable() {
        let rolled = KeyRotationError::RolledBack { cause: "rejected".into() };
        let no_recovery = KeyRotationError::CriticalNoRecovery { cause: "rejected".into() };
        let failed = KeyRotationError::CriticalRecoveryFailed {
            cause: "rejected".into(),
            recovery_cause: "timeout".into(),
        };

        assert!(rolled.to_string().contains("restored with the old password"));
        assert!(!rolled.is_critical());
        assert!(no_recovery.to_string().starts_with("CRITICAL"));
        assert!(no_recovery.to_string().contains("no previous password"));
        assert!(failed.to_string().contains("could not be restored"));
        assert!(failed.to_string().contains("timeout"));
        assert!(failed.is_critical());
    }

    #[test]
    fn test_sync_error_wraps_sources() {
        let err: SyncError = TransportError::Network("offline".into()).into();
        assert_eq!(err.to_string(), "Network error: offline");
        let err: SyncError = StoreError::NotFound("op".into()).into();
        assert!(matches!(err, SyncError::Store(_)));
    }
}
