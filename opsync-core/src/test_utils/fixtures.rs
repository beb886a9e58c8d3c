//! Test fixtures for creating common test objects
//!
//! Provides builder patterns and factory functions for operations,
//! actions and application state.

use crate::core_oplog::clock::VectorClock;
use crate::core_oplog::model::{
    Action, ActionType, AppState, EntityType, MultiEntityPayload, OpType, Operation,
    CURRENT_SCHEMA_VERSION,
};
use serde_json::{json, Map, Value};

/// Builder for creating test operations
pub struct TestOpBuilder {
    op: Operation,
}

impl TestOpBuilder {
    /// Create operation on a task, authored by `client_id` at counter 1
    pub fn new(id: impl Into<String>, client_id: &str) -> Self {
        Self {
            op: Operation {
                id: id.into(),
                action_type: ActionType::new("[Task] Update Task"),
                op_type: OpType::Update,
                entity_type: EntityType::Task,
                entity_id: None,
                entity_ids: None,
                payload: json!({}),
                client_id: client_id.to_string(),
                vector_clock: VectorClock::with_entry(client_id, 1),
                timestamp: 1_000,
                schema_version: CURRENT_SCHEMA_VERSION,
                is_payload_encrypted: false,
            },
        }
    }

    pub fn action(mut self, action_type: &str, op_type: OpType) -> Self {
        self.op.action_type = ActionType::new(action_type);
        self.op.op_type = op_type;
        self
    }

    pub fn entity(mut self, entity_type: EntityType, entity_id: &str) -> Self {
        self.op.entity_type = entity_type;
        self.op.entity_id = Some(entity_id.to_string());
        self.op.entity_ids = Some(vec![entity_id.to_string()]);
        self
    }

    /// Flat payload, as written by older clients
    pub fn flat_payload(mut self, payload: Value) -> Self {
        self.op.payload = payload;
        self
    }

    /// Multi-entity payload around `action_payload`
    pub fn payload(mut self, action_payload: Value) -> Self {
        let map = action_payload.as_object().cloned().unwrap_or_default();
        self.op.payload = MultiEntityPayload::new(map).into_value();
        self
    }

    pub fn clock(mut self, entries: &[(&str, u64)]) -> Self {
        self.op.vector_clock = entries.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.op.timestamp = timestamp;
        self
    }

    pub fn build(self) -> Operation {
        self.op
    }
}

/// Create a task operation with a multi-entity payload
pub fn create_task_op(id: &str, client_id: &str, counter: u64, task_id: &str, title: &str) -> Operation {
    TestOpBuilder::new(id, client_id)
        .action("[Task] Add Task", OpType::Create)
        .entity(EntityType::Task, task_id)
        .payload(json!({"task": {"id": task_id, "title": title}}))
        .clock(&[(client_id, counter)])
        .build()
}

/// Update a task title with a multi-entity payload
pub fn update_task_op(id: &str, client_id: &str, counter: u64, task_id: &str, title: &str) -> Operation {
    TestOpBuilder::new(id, client_id)
        .action("[Task] Update Task", OpType::Update)
        .entity(EntityType::Task, task_id)
        .payload(json!({"id": task_id, "changes": {"title": title}}))
        .clock(&[(client_id, counter)])
        .build()
}

/// Sequence of `count` operations over a handful of tasks, in causal order
pub fn task_op_sequence(client_id: &str, count: u64) -> Vec<Operation> {
    (1..=count)
        .map(|n| {
            let task_id = format!("task-{}", n % 10);
            let id = format!("{}-op-{}", client_id, n);
            if n <= 10 {
                create_task_op(&id, client_id, n, &task_id, &format!("Task {}", n))
            } else {
                update_task_op(&id, client_id, n, &task_id, &format!("Title {}", n))
            }
        })
        .collect()
}

/// Local persistent action adding a task
pub fn add_task_action(task_id: &str, title: &str) -> Action {
    let mut payload = Map::new();
    payload.insert("task".into(), json!({"id": task_id, "title": title}));
    Action::persistent(
        "[Task] Add Task",
        OpType::Create,
        EntityType::Task,
        Some(task_id.to_string()),
        payload,
    )
}

/// Local persistent action changing a task title
pub fn update_task_action(task_id: &str, title: &str) -> Action {
    let mut payload = Map::new();
    payload.insert("id".into(), json!(task_id));
    payload.insert("changes".into(), json!({"title": title}));
    Action::persistent(
        "[Task] Update Task",
        OpType::Update,
        EntityType::Task,
        Some(task_id.to_string()),
        payload,
    )
}

/// State with two tasks, a project and a global config
pub fn sample_state() -> AppState {
    let mut state = AppState::new();
    if let Some(tasks) = state.collection_mut(EntityType::Task) {
        for (id, title) in [("task-1", "Write report"), ("task-2", "Review PR")] {
            let entity = json!({"id": id, "title": title, "isDone": false});
            tasks.upsert(id.to_string(), entity.as_object().cloned().unwrap_or_default());
        }
    }
    if let Some(projects) = state.collection_mut(EntityType::Project) {
        let entity = json!({"id": "project-1", "title": "Inbox", "taskIds": ["task-1", "task-2"]});
        projects.upsert("project-1".into(), entity.as_object().cloned().unwrap_or_default());
    }
    state
        .singletons
        .insert(EntityType::GlobalConfig, json!({"lang": "en", "isDarkMode": true}));
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_builder() {
        let op = TestOpBuilder::new("op-1", "client-a")
            .entity(EntityType::Project, "p1")
            .clock(&[("client-a", 3), ("client-b", 1)])
            .timestamp(42)
            .build();
        assert_eq!(op.entity_type, EntityType::Project);
        assert_eq!(op.vector_clock.get("client-a"), 3);
        assert_eq!(op.timestamp, 42);
    }

    #[test]
    fn test_sequence_is_causal() {
        let ops = task_op_sequence("c", 25);
        assert_eq!(ops.len(), 25);
        for pair in ops.windows(2) {
            assert!(pair[0].vector_clock.happened_before(&pair[1].vector_clock));
        }
    }

    #[test]
    fn test_sample_state() {
        let state = sample_state();
        assert_eq!(state.entity_count(), 3);
        assert!(state.singleton(EntityType::GlobalConfig).is_some());
    }
}
