//! State-change requests flowing through the reducer chain.

use super::types::{ActionType, EntityType, OpType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Persistence metadata attached to a state-change request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMeta {
    pub is_persistent: bool,
    /// Set on replayed operations so capture never logs them again
    pub is_remote: bool,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ids: Option<Vec<String>>,
    pub op_type: OpType,
}

/// A state-change request.
///
/// Replayed operations become actions with `meta.is_remote = true`.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_type: ActionType,
    pub payload: Map<String, Value>,
    pub meta: Option<ActionMeta>,
}

impl Action {
    /// Non-persistent action
    pub fn new(action_type: impl Into<ActionType>, payload: Map<String, Value>) -> Self {
        Action {
            action_type: action_type.into(),
            payload,
            meta: None,
        }
    }

    /// Locally issued persistent action, picked up by capture
    pub fn persistent(
        action_type: impl Into<ActionType>,
        op_type: OpType,
        entity_type: EntityType,
        entity_id: Option<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Action {
            action_type: action_type.into(),
            payload,
            meta: Some(ActionMeta {
                is_persistent: true,
                is_remote: false,
                entity_type,
                entity_id,
                entity_ids: None,
                op_type,
            }),
        }
    }

    pub fn with_entity_ids(mut self, ids: Vec<String>) -> Self {
        if let Some(meta) = self.meta.as_mut() {
            meta.entity_ids = Some(ids);
        }
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.meta.as_ref().is_some_and(|m| m.is_persistent)
    }

    pub fn is_remote(&self) -> bool {
        self.meta.as_ref().is_some_and(|m| m.is_remote)
    }

    pub fn op_type(&self) -> Option<OpType> {
        self.meta.as_ref().map(|m| m.op_type)
    }

    /// Flat JSON form: payload fields first, then `type` and `meta`.
    ///
    /// A payload field named `type` never replaces the dispatch type.
    pub fn to_json(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert("type".to_string(), Value::String(self.action_type.to_string()));
        match &self.meta {
            Some(meta) => {
                obj.insert(
                    "meta".to_string(),
                    serde_json::to_value(meta).unwrap_or(Value::Null),
                );
            }
            None => {
                obj.remove("meta");
            }
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_type_field_does_not_clobber_dispatch_type() {
        let mut payload = Map::new();
        payload.insert("type".into(), json!("DISCRIMINATOR"));
        payload.insert("title".into(), json!("t"));
        let action = Action::persistent(
            "[Metric] Add Metric",
            OpType::Create,
            EntityType::Metric,
            Some("m1".into()),
            payload,
        );

        let json = action.to_json();
        assert_eq!(json["type"], "[Metric] Add Metric");
        assert_eq!(json["title"], "t");
        assert_eq!(json["meta"]["isPersistent"], true);
        assert_eq!(json["meta"]["isRemote"], false);
        assert_eq!(action.payload["type"], "DISCRIMINATOR");
    }

    #[test]
    fn test_flags() {
        let plain = Action::new("[Ui] Toggle", Map::new());
        assert!(!plain.is_persistent());
        assert!(!plain.is_remote());
        assert_eq!(plain.op_type(), None);
        assert!(plain.to_json().get("meta").is_none());
    }
}
