/*
    state.rs - Application state mutated by replayed actions

    Collection entity types live in keyed collections with an ordered id
    list; singleton types hold one JSON value each. The whole structure
    is the payload of full-state operations and snapshots.
*/

use super::types::{EntityType, StoragePattern};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Entity object as stored in a collection
pub type Entity = Map<String, Value>;

/// Keyed collection of entities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityCollection {
    /// Insertion order of entity ids
    pub ids: Vec<String>,
    pub entities: BTreeMap<String, Entity>,
}

impl EntityCollection {
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Insert or replace an entity, appending its id if new
    pub fn upsert(&mut self, id: String, entity: Entity) {
        if !self.entities.contains_key(&id) {
            self.ids.push(id.clone());
        }
        self.entities.insert(id, entity);
    }

    /// Shallow-merge `changes` into an existing entity. Returns false if absent.
    pub fn merge_into(&mut self, id: &str, changes: &Entity) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                for (key, value) in changes {
                    entity.insert(key.clone(), value.clone());
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        let removed = self.entities.remove(id);
        if removed.is_some() {
            self.ids.retain(|existing| existing != id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Complete application state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub collections: BTreeMap<EntityType, EntityCollection>,
    #[serde(default)]
    pub singletons: BTreeMap<EntityType, Value>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, entity_type: EntityType) -> Option<&EntityCollection> {
        self.collections.get(&entity_type)
    }

    /// Mutable collection, created on first use.
    ///
    /// Returns `None` for types that are not stored as collections.
    pub fn collection_mut(&mut self, entity_type: EntityType) -> Option<&mut EntityCollection> {
        if entity_type.storage_pattern() != StoragePattern::Collection {
            return None;
        }
        Some(self.collections.entry(entity_type).or_default())
    }

    pub fn entity(&self, entity_type: EntityType, id: &str) -> Option<&Entity> {
        self.collection(entity_type).and_then(|c| c.get(id))
    }

    pub fn singleton(&self, entity_type: EntityType) -> Option<&Value> {
        self.singletons.get(&entity_type)
    }

    /// Total number of collection entities
    pub fn entity_count(&self) -> usize {
        self.collections.values().map(EntityCollection::len).sum()
    }

    /// Serialize the whole state as a full-state payload
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: Value) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_upsert_preserves_order() {
        let mut collection = EntityCollection::default();
        collection.upsert("b".into(), entity(json!({"id": "b"})));
        collection.upsert("a".into(), entity(json!({"id": "a"})));
        collection.upsert("b".into(), entity(json!({"id": "b", "title": "x"})));
        assert_eq!(collection.ids, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(collection.get("b").unwrap()["title"], "x");
    }

    #[test]
    fn test_merge_and_remove() {
        let mut collection = EntityCollection::default();
        collection.upsert("a".into(), entity(json!({"id": "a", "title": "old", "done": false})));
        assert!(collection.merge_into("a", &entity(json!({"title": "new"}))));
        assert!(!collection.merge_into("missing", &entity(json!({"title": "new"}))));
        assert_eq!(collection.get("a").unwrap()["title"], "new");
        assert_eq!(collection.get("a").unwrap()["done"], false);

        assert!(collection.remove("a").is_some());
        assert!(collection.ids.is_empty());
        assert!(collection.remove("a").is_none());
    }

    #[test]
    fn test_collection_mut_rejects_non_collections() {
        let mut state = AppState::new();
        assert!(state.collection_mut(EntityType::Task).is_some());
        assert!(state.collection_mut(EntityType::GlobalConfig).is_none());
        assert!(state.collection_mut(EntityType::All).is_none());
    }

    #[test]
    fn test_json_round_trip_uses_entity_names() {
        let mut state = AppState::new();
        state
            .collection_mut(EntityType::Task)
            .unwrap()
            .upsert("t1".into(), entity(json!({"id": "t1"})));
        state.singletons.insert(EntityType::GlobalConfig, json!({"lang": "en"}));

        let value = state.to_value().unwrap();
        assert_eq!(value["collections"]["TASK"]["ids"], json!(["t1"]));
        assert_eq!(value["singletons"]["GLOBAL_CONFIG"]["lang"], "en");
        assert_eq!(AppState::from_value(value).unwrap(), state);
    }
}
