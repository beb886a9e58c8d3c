/*
    conflict.rs - Detection and LWW resolution of concurrent edits

    A remote operation conflicts with this device when it targets an
    entity that also has unsynced local operations, and their vector
    clocks are concurrent. Each conflict is resolved per entity with one
    deterministic winner rule, `compare_for_lww`, which is used both when
    deciding here and when the resulting LWW update is replayed elsewhere:

    1. If one side's merged clock dominates the other, that side wins.
    2. Otherwise the side with the greater max timestamp wins.
    3. Equal timestamps: remote wins.

    The remote operations are applied whatever the outcome: a multi-entity
    remote op may carry changes to ids outside the conflict, and peers
    apply it too. When local wins, a new operation carrying the local
    entity state is synthesized with a clock that dominates both sides and
    applied on top, so every peer converges on it:
    - collection entity present  -> LWW update with the whole entity
    - singleton present          -> update carrying the whole value
    - gone after a local delete  -> the delete is re-issued
    - otherwise                  -> the latest local op, re-stamped
*/

use crate::core_oplog::clock::{VectorClock, VectorClockComparison};
use crate::core_oplog::model::{
    ActionType, AppState, EntityType, MultiEntityPayload, OpType, Operation,
    CURRENT_SCHEMA_VERSION,
};
use crate::core_oplog::now_millis;
use crate::core_oplog::store::OperationLogEntry;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Which side of a conflict wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LwwWinner {
    Local,
    Remote,
}

/// Causal and wall-clock summary of one side's operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LwwSide {
    pub clock: VectorClock,
    pub max_timestamp: u64,
}

impl LwwSide {
    pub fn of<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> Self {
        ops.into_iter().fold(LwwSide::default(), |mut side, op| {
            side.clock.merge(&op.vector_clock);
            side.max_timestamp = side.max_timestamp.max(op.timestamp);
            side
        })
    }
}

/// The single winner rule for concurrent edits
pub fn compare_for_lww(local: &LwwSide, remote: &LwwSide) -> LwwWinner {
    match local.clock.compare(&remote.clock) {
        VectorClockComparison::GreaterThan => LwwWinner::Local,
        VectorClockComparison::LessThan => LwwWinner::Remote,
        VectorClockComparison::Equal | VectorClockComparison::Concurrent => {
            if local.max_timestamp > remote.max_timestamp {
                LwwWinner::Local
            } else {
                LwwWinner::Remote
            }
        }
    }
}

/// Concurrent edits to one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityConflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub local_ops: Vec<Operation>,
    pub remote_ops: Vec<Operation>,
}

/// Remote operations split by whether they conflict
#[derive(Debug, Clone, Default)]
pub struct ConflictScan {
    pub conflicts: Vec<EntityConflict>,
    /// Non-conflicting remote operations in their original order
    pub clean: Vec<Operation>,
}

/// Find remote operations that are concurrent with pending local ones.
///
/// Full-state operations never conflict per entity.
pub fn detect_conflicts(
    remote_ops: Vec<Operation>,
    pending_by_entity: &HashMap<(EntityType, String), Vec<OperationLogEntry>>,
) -> ConflictScan {
    let mut scan = ConflictScan::default();
    let mut index: HashMap<(EntityType, String), usize> = HashMap::new();

    for remote in remote_ops {
        let conflicting_key = if remote.op_type.is_full_state() {
            None
        } else {
            remote.target_ids().into_iter().find_map(|id| {
                let key = (remote.entity_type, id);
                let local = pending_by_entity.get(&key)?;
                local
                    .iter()
                    .any(|e| e.op.vector_clock.is_concurrent(&remote.vector_clock))
                    .then_some(key)
            })
        };

        let Some(key) = conflicting_key else {
            scan.clean.push(remote);
            continue;
        };

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            let local_ops = pending_by_entity
                .get(&key)
                .map(|entries| entries.iter().map(|e| e.op.clone()).collect())
                .unwrap_or_default();
            scan.conflicts.push(EntityConflict {
                entity_type: key.0,
                entity_id: key.1.clone(),
                local_ops,
                remote_ops: Vec::new(),
            });
            scan.conflicts.len() - 1
        });
        scan.conflicts[slot].remote_ops.push(remote);
    }

    scan
}

/// What to do about one conflict
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub winner: LwwWinner,
    /// Local operations superseded by the resolution
    pub rejected_local: Vec<String>,
    /// Remote operations to apply, before `new_local_op`
    pub remote_to_apply: Vec<Operation>,
    /// New local operation carrying the winning state (local wins only)
    pub new_local_op: Option<Operation>,
}

/// Resolve one conflict against the current local state.
///
/// `current_clock` is this device's merged clock; the synthesized
/// operation's clock dominates it and every clock in the conflict.
pub fn resolve_conflict(
    conflict: EntityConflict,
    state: &AppState,
    client_id: &str,
    current_clock: &VectorClock,
) -> ConflictResolution {
    let local_side = LwwSide::of(&conflict.local_ops);
    let remote_side = LwwSide::of(&conflict.remote_ops);
    let winner = compare_for_lww(&local_side, &remote_side);
    let rejected_local = conflict.local_ops.iter().map(|op| op.id.clone()).collect();

    tracing::info!(
        entity_type = %conflict.entity_type,
        entity_id = %conflict.entity_id,
        local_ops = conflict.local_ops.len(),
        remote_ops = conflict.remote_ops.len(),
        local_ts = local_side.max_timestamp,
        remote_ts = remote_side.max_timestamp,
        ?winner,
        "Resolved concurrent edit"
    );

    match winner {
        LwwWinner::Remote => ConflictResolution {
            winner,
            rejected_local,
            remote_to_apply: conflict.remote_ops,
            new_local_op: None,
        },
        LwwWinner::Local => {
            let mut clock = current_clock.merged(&local_side.clock).merged(&remote_side.clock);
            clock.increment(client_id);
            let new_op = winning_local_op(&conflict, state, client_id, clock);
            ConflictResolution {
                winner,
                rejected_local,
                remote_to_apply: conflict.remote_ops,
                new_local_op: Some(new_op),
            }
        }
    }
}

/// Operation that re-asserts the local side of a conflict
fn winning_local_op(
    conflict: &EntityConflict,
    state: &AppState,
    client_id: &str,
    clock: VectorClock,
) -> Operation {
    let entity_type = conflict.entity_type;
    let id_payload = || {
        let mut payload = Map::new();
        payload.insert("id".to_string(), Value::String(conflict.entity_id.clone()));
        payload
    };

    let (action_type, op_type, action_payload) = if let Some(entity) = state
        .entity(entity_type, &conflict.entity_id)
        .filter(|_| entity_type.supports_lww())
    {
        (ActionType::lww_update(entity_type), OpType::LwwUpdate, entity.clone())
    } else if let Some(Value::Object(value)) = state.singleton(entity_type) {
        let mut payload = Map::new();
        payload.insert("changes".to_string(), Value::Object(value.clone()));
        (ActionType::new(format!("[{}] Update", entity_type)), OpType::Update, payload)
    } else if let Some(delete) = conflict.local_ops.iter().rev().find(|op| op.op_type == OpType::Delete) {
        (delete.action_type.clone(), OpType::Delete, id_payload())
    } else if let Some(latest) = conflict.local_ops.last() {
        return Operation {
            id: Operation::new_id(),
            client_id: client_id.to_string(),
            vector_clock: clock,
            timestamp: now_millis(),
            ..latest.clone()
        };
    } else {
        (ActionType::new(format!("[{}] Delete", entity_type)), OpType::Delete, id_payload())
    };

    Operation {
        id: Operation::new_id(),
        action_type,
        op_type,
        entity_type,
        entity_id: Some(conflict.entity_id.clone()),
        entity_ids: Some(vec![conflict.entity_id.clone()]),
        payload: MultiEntityPayload::new(action_payload).into_value(),
        client_id: client_id.to_string(),
        vector_clock: clock,
        timestamp: now_millis(),
        schema_version: CURRENT_SCHEMA_VERSION,
        is_payload_encrypted: false,
    }
}
