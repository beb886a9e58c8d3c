/*
    types.rs - Core enumerations of the operation model

    OpType: what kind of change an operation describes
    EntityType: which domain entity the change targets
    ActionType: the dispatch name of the state-change request
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change recorded by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    #[serde(rename = "CRT")]
    Create,
    #[serde(rename = "UPD")]
    Update,
    #[serde(rename = "DEL")]
    Delete,
    #[serde(rename = "MOV")]
    Move,
    #[serde(rename = "BATCH")]
    Batch,
    #[serde(rename = "LWW_UPDATE")]
    LwwUpdate,
    #[serde(rename = "SYNC_IMPORT")]
    SyncImport,
    #[serde(rename = "BACKUP_IMPORT")]
    BackupImport,
    #[serde(rename = "REPAIR")]
    Repair,
}

impl OpType {
    /// Full-state operations carry the entire application state as payload.
    pub fn is_full_state(&self) -> bool {
        matches!(self, OpType::SyncImport | OpType::BackupImport | OpType::Repair)
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Create => "CRT",
            OpType::Update => "UPD",
            OpType::Delete => "DEL",
            OpType::Move => "MOV",
            OpType::Batch => "BATCH",
            OpType::LwwUpdate => "LWW_UPDATE",
            OpType::SyncImport => "SYNC_IMPORT",
            OpType::BackupImport => "BACKUP_IMPORT",
            OpType::Repair => "REPAIR",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an entity type is laid out in the application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePattern {
    /// Keyed collection with an ordered id list
    Collection,
    /// One object per type
    Singleton,
    /// Stored outside the main state
    Virtual,
    /// The `ALL` sentinel
    FullState,
}

/// Domain entity targeted by an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Task,
    Project,
    Tag,
    Note,
    SimpleCounter,
    TaskRepeatCfg,
    Metric,
    IssueProvider,
    GlobalConfig,
    TimeTracking,
    MenuTree,
    WorkContext,
    Planner,
    Board,
    Reminder,
    PluginUserData,
    PluginMetadata,
    /// Sentinel used only by full-state operations
    All,
}

impl EntityType {
    /// Every entity type, sentinel included
    pub const VARIANTS: [EntityType; 18] = [
        EntityType::Task,
        EntityType::Project,
        EntityType::Tag,
        EntityType::Note,
        EntityType::SimpleCounter,
        EntityType::TaskRepeatCfg,
        EntityType::Metric,
        EntityType::IssueProvider,
        EntityType::GlobalConfig,
        EntityType::TimeTracking,
        EntityType::MenuTree,
        EntityType::WorkContext,
        EntityType::Planner,
        EntityType::Board,
        EntityType::Reminder,
        EntityType::PluginUserData,
        EntityType::PluginMetadata,
        EntityType::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "TASK",
            EntityType::Project => "PROJECT",
            EntityType::Tag => "TAG",
            EntityType::Note => "NOTE",
            EntityType::SimpleCounter => "SIMPLE_COUNTER",
            EntityType::TaskRepeatCfg => "TASK_REPEAT_CFG",
            EntityType::Metric => "METRIC",
            EntityType::IssueProvider => "ISSUE_PROVIDER",
            EntityType::GlobalConfig => "GLOBAL_CONFIG",
            EntityType::TimeTracking => "TIME_TRACKING",
            EntityType::MenuTree => "MENU_TREE",
            EntityType::WorkContext => "WORK_CONTEXT",
            EntityType::Planner => "PLANNER",
            EntityType::Board => "BOARD",
            EntityType::Reminder => "REMINDER",
            EntityType::PluginUserData => "PLUGIN_USER_DATA",
            EntityType::PluginMetadata => "PLUGIN_METADATA",
            EntityType::All => "ALL",
        }
    }

    /// Parse a wire name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|t| t.as_str() == name)
    }

    pub fn storage_pattern(&self) -> StoragePattern {
        match self {
            EntityType::Task
            | EntityType::Project
            | EntityType::Tag
            | EntityType::Note
            | EntityType::SimpleCounter
            | EntityType::TaskRepeatCfg
            | EntityType::Metric
            | EntityType::IssueProvider => StoragePattern::Collection,
            EntityType::GlobalConfig
            | EntityType::TimeTracking
            | EntityType::MenuTree
            | EntityType::WorkContext
            | EntityType::Planner
            | EntityType::Board
            | EntityType::Reminder => StoragePattern::Singleton,
            EntityType::PluginUserData | EntityType::PluginMetadata => StoragePattern::Virtual,
            EntityType::All => StoragePattern::FullState,
        }
    }

    /// Whether LWW updates can target this type
    pub fn supports_lww(&self) -> bool {
        self.storage_pattern() == StoragePattern::Collection
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LWW_SUFFIX: &str = "] LWW Update";

/// Dispatch name of a state-change request, e.g. `[Task] Update Task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(String);

impl ActionType {
    pub fn new(name: impl Into<String>) -> Self {
        ActionType(name.into())
    }

    /// `[<ENTITY>] LWW Update` for the given entity type
    pub fn lww_update(entity_type: EntityType) -> Self {
        ActionType(format!("[{}{}", entity_type.as_str(), LWW_SUFFIX))
    }

    /// Entity name inside an LWW action type, if this is one.
    ///
    /// The name is returned raw so unknown entity names can be reported.
    pub fn lww_entity_name(&self) -> Option<&str> {
        self.0
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(LWW_SUFFIX))
            .filter(|name| !name.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionType {
    fn from(name: &str) -> Self {
        ActionType(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_type_wire_names() {
        assert_eq!(serde_json::to_string(&OpType::Create).unwrap(), "\"CRT\"");
        assert_eq!(serde_json::to_string(&OpType::LwwUpdate).unwrap(), "\"LWW_UPDATE\"");
        let parsed: OpType = serde_json::from_str("\"BACKUP_IMPORT\"").unwrap();
        assert_eq!(parsed, OpType::BackupImport);
    }

    #[test]
    fn test_full_state_op_types() {
        assert!(OpType::SyncImport.is_full_state());
        assert!(OpType::BackupImport.is_full_state());
        assert!(OpType::Repair.is_full_state());
        assert!(!OpType::Update.is_full_state());
        assert!(!OpType::LwwUpdate.is_full_state());
    }

    #[test]
    fn test_entity_type_names_match_serde() {
        for entity_type in EntityType::VARIANTS {
            let json = serde_json::to_string(&entity_type).unwrap();
            assert_eq!(json, format!("\"{}\"", entity_type.as_str()));
            assert_eq!(EntityType::from_name(entity_type.as_str()), Some(entity_type));
        }
        assert_eq!(EntityType::from_name("UNKNOWN"), None);
    }

    #[test]
    fn test_lww_support() {
        assert!(EntityType::Task.supports_lww());
        assert!(EntityType::IssueProvider.supports_lww());
        assert!(!EntityType::GlobalConfig.supports_lww());
        assert!(!EntityType::PluginUserData.supports_lww());
        assert!(!EntityType::All.supports_lww());
    }

    #[test]
    fn test_lww_action_type() {
        let action_type = ActionType::lww_update(EntityType::TaskRepeatCfg);
        assert_eq!(action_type.as_str(), "[TASK_REPEAT_CFG] LWW Update");
        assert_eq!(action_type.lww_entity_name(), Some("TASK_REPEAT_CFG"));

        assert_eq!(ActionType::new("[Task] Update Task").lww_entity_name(), None);
        assert_eq!(ActionType::new("[] LWW Update").lww_entity_name(), None);
        assert_eq!(ActionType::new("[BOGUS] LWW Update").lww_entity_name(), Some("BOGUS"));
    }
}
