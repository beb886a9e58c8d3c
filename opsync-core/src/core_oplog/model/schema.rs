/*
    schema.rs - Versioned decoding of stored operations

    Every persisted or downloaded operation carries a `schemaVersion`.
    Decoding dispatches on it and runs one migration per version bump,
    so the rest of the crate only ever sees current-version operations.

    Version history:
    - v1: no `entityIds`, no `isPayloadEncrypted`, flat payloads,
      possibly retired action names
    - v2: current shape
*/

use super::aliases::ActionAliasTable;
use super::operation::{MultiEntityPayload, Operation, CURRENT_SCHEMA_VERSION};
use super::types::{ActionType, EntityType, OpType};
use crate::core_oplog::clock::VectorClock;
use crate::core_oplog::store::errors::{StoreResult, ValidationError};
use serde::Deserialize;
use serde_json::Value;

/// Operation as written by schema version 1
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationV1 {
    pub id: String,
    pub action_type: ActionType,
    pub op_type: OpType,
    pub entity_type: EntityType,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub client_id: String,
    #[serde(default)]
    pub vector_clock: VectorClock,
    pub timestamp: u64,
    #[serde(default)]
    pub is_payload_encrypted: Option<bool>,
}

/// An operation decoded at the version it was written with
#[derive(Debug, Clone)]
pub enum VersionedOperation {
    V1(OperationV1),
    V2(Operation),
}

impl VersionedOperation {
    /// Parse a raw JSON record, dispatching on `schemaVersion`.
    ///
    /// Records without a version predate versioning and are treated as v1.
    pub fn parse(value: Value) -> StoreResult<Self> {
        let version = match value.get("schemaVersion") {
            None | Some(Value::Null) => 1,
            Some(v) => v.as_u64().ok_or_else(|| ValidationError::InvalidField {
                field: "schemaVersion".to_string(),
                reason: format!("expected an integer, got {}", v),
            })?,
        };

        match version {
            1 => Ok(VersionedOperation::V1(serde_json::from_value(value)?)),
            2 => Ok(VersionedOperation::V2(serde_json::from_value(value)?)),
            other => Err(ValidationError::SchemaMismatch(format!(
                "unsupported operation schema version {} (current is {})",
                other, CURRENT_SCHEMA_VERSION
            ))
            .into()),
        }
    }

    pub fn schema_version(&self) -> u32 {
        match self {
            VersionedOperation::V1(_) => 1,
            VersionedOperation::V2(op) => op.schema_version,
        }
    }

    /// Run every migration needed to reach the current version
    pub fn into_current(self, aliases: &ActionAliasTable) -> Operation {
        match self {
            VersionedOperation::V1(v1) => migrate_v1_to_v2(v1, aliases),
            VersionedOperation::V2(op) => op,
        }
    }
}

/// Upgrade a v1 record.
///
/// Plaintext flat payloads of non-full-state operations are wrapped into a
/// multi-entity payload. Encrypted payloads stay opaque.
pub fn migrate_v1_to_v2(v1: OperationV1, aliases: &ActionAliasTable) -> Operation {
    let is_payload_encrypted = v1.is_payload_encrypted.unwrap_or(false);

    let payload = match v1.payload {
        Value::Object(flat)
            if !is_payload_encrypted
                && !v1.op_type.is_full_state()
                && !MultiEntityPayload::detect(&Value::Object(flat.clone())) =>
        {
            MultiEntityPayload::new(flat).into_value()
        }
        other => other,
    };

    Operation {
        id: v1.id,
        action_type: aliases.resolve(&v1.action_type),
        op_type: v1.op_type,
        entity_type: v1.entity_type,
        entity_ids: v1.entity_id.clone().map(|id| vec![id]),
        entity_id: v1.entity_id,
        payload,
        client_id: v1.client_id,
        vector_clock: v1.vector_clock,
        timestamp: v1.timestamp,
        schema_version: CURRENT_SCHEMA_VERSION,
        is_payload_encrypted,
    }
}

/// Decode a stored operation of any supported version
pub fn decode_operation(value: Value) -> StoreResult<Operation> {
    decode_operation_with(value, &ActionAliasTable::default())
}

pub fn decode_operation_with(value: Value, aliases: &ActionAliasTable) -> StoreResult<Operation> {
    Ok(VersionedOperation::parse(value)?.into_current(aliases))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::store::errors::StoreError;
    use serde_json::json;

    fn v1_record() -> Value {
        json!({
            "id": "op-1",
            "actionType": "[Old] Legacy Action",
            "opType": "UPD",
            "entityType": "TASK",
            "entityId": "task-1",
            "payload": {"id": "task-1", "changes": {"title": "hi"}},
            "clientId": "client-a",
            "vectorClock": {"client-a": 3},
            "timestamp": 1000,
            "schemaVersion": 1
        })
    }

    #[test]
    fn test_v1_migration() {
        let aliases = ActionAliasTable::from_entries([("[Old] Legacy Action", "[Task] Update Task")]);
        let op = decode_operation_with(v1_record(), &aliases).unwrap();

        assert_eq!(op.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(op.action_type.as_str(), "[Task] Update Task");
        assert_eq!(op.entity_ids, Some(vec!["task-1".to_string()]));
        assert!(!op.is_payload_encrypted);
        assert!(MultiEntityPayload::detect(&op.payload));
        assert_eq!(op.payload["actionPayload"]["changes"]["title"], "hi");
        assert_eq!(op.payload["entityChanges"], json!([]));
    }

    #[test]
    fn test_missing_version_is_v1() {
        let mut record = v1_record();
        record.as_object_mut().unwrap().remove("schemaVersion");
        let parsed = VersionedOperation::parse(record).unwrap();
        assert_eq!(parsed.schema_version(), 1);
    }

    #[test]
    fn test_v1_full_state_payload_not_wrapped() {
        let mut record = v1_record();
        record["opType"] = json!("SYNC_IMPORT");
        record["entityType"] = json!("ALL");
        record["payload"] = json!({"collections": {}});
        let op = decode_operation(record).unwrap();
        assert_eq!(op.payload, json!({"collections": {}}));
    }

    #[test]
    fn test_v1_encrypted_payload_kept_opaque() {
        let mut record = v1_record();
        record["payload"] = json!("BASE64CIPHERTEXT");
        record["isPayloadEncrypted"] = json!(true);
        let op = decode_operation(record).unwrap();
        assert!(op.is_payload_encrypted);
        assert_eq!(op.payload, json!("BASE64CIPHERTEXT"));
    }

    #[test]
    fn test_v2_decodes_unchanged() {
        let mut record = v1_record();
        record["schemaVersion"] = json!(2);
        record["isPayloadEncrypted"] = json!(false);
        let op = decode_operation(record).unwrap();
        assert_eq!(op.action_type.as_str(), "[Old] Legacy Action");
        assert_eq!(op.entity_ids, None);
        assert_eq!(op.payload["changes"]["title"], "hi");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut record = v1_record();
        record["schemaVersion"] = json!(99);
        let err = decode_operation(record).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(err.to_string().contains("99"));
    }
}
