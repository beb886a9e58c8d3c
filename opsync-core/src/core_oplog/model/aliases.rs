//! Compatibility table for retired action type names.
//!
//! Entries are only ever appended: old log entries may still reference a
//! retired name long after the action was renamed.

use super::types::ActionType;
use std::collections::HashMap;

/// Built-in `(retired name, current name)` pairs
pub const ACTION_TYPE_ALIASES: &[(&str, &str)] = &[
    ("[Task] Update Task Ui", "[Task] Update Task"),
    ("[TaskRepeatCfg] Upsert TaskRepeatCfg", "[TaskRepeatCfg] Update TaskRepeatCfg"),
];

/// Lookup table from retired action names to their replacements
#[derive(Debug, Clone)]
pub struct ActionAliasTable {
    aliases: HashMap<String, String>,
}

impl ActionAliasTable {
    /// Table from custom entries
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        ActionAliasTable {
            aliases: entries
                .into_iter()
                .map(|(old, new)| (old.to_string(), new.to_string()))
                .collect(),
        }
    }

    /// Current name for `action_type`, or the name itself if it was never renamed
    pub fn resolve(&self, action_type: &ActionType) -> ActionType {
        match self.aliases.get(action_type.as_str()) {
            Some(current) => ActionType::new(current.clone()),
            None => action_type.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl Default for ActionAliasTable {
    fn default() -> Self {
        Self::from_entries(ACTION_TYPE_ALIASES.iter().copied())
    }
}
