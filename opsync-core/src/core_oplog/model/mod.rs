/*
    model - Operation model

    Types shared by every other part of the operation log:
    - Operation records and their multi-entity payloads
    - OpType / EntityType / ActionType enumerations
    - Actions (state-change requests) and the application state
    - Action-type alias table and versioned schema decoding
*/

pub mod action;
pub mod aliases;
pub mod operation;
pub mod schema;
pub mod state;
pub mod types;

pub use action::{Action, ActionMeta};
pub use aliases::{ActionAliasTable, ACTION_TYPE_ALIASES};
pub use operation::{
    EntityChange, MultiEntityPayload, Operation, CURRENT_SCHEMA_VERSION, FULL_STATE_KEY,
};
pub use schema::{decode_operation, decode_operation_with, migrate_v1_to_v2, VersionedOperation};
pub use state::{AppState, Entity, EntityCollection};
pub use types::{ActionType, EntityType, OpType, StoragePattern};
