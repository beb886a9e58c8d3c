/*
    LWW convergence

    Two devices edit the same task concurrently. The device whose edit
    wins resolves the conflict into an LWW update; once every device has
    applied it, all of them show the winning fields.
*/

use super::harness::{delete_task_action, Device};
use crate::core_oplog::apply::{detect_conflicts, resolve_conflict, LwwWinner};
use crate::core_oplog::model::{EntityType, OpType, Operation};
use crate::core_oplog::store::OpSource;
use crate::test_utils::fixtures::{create_task_op, update_task_action, TestOpBuilder};
use serde_json::json;

/// Both devices start from the same task, received from a third client
fn seeded_pair() -> (Device, Device) {
    let seeds = [
        create_task_op("seed", "client-s", 1, "t1", "Base"),
        create_task_op("seed-2", "client-s", 2, "t2", "Second"),
    ];
    let a = Device::new("client-a");
    let b = Device::new("client-b");
    for device in [&a, &b] {
        for seed in &seeds {
            let seq = device.store.append(seed.clone(), OpSource::Remote).unwrap();
            device.container.bulk_apply(std::slice::from_ref(seed)).unwrap();
            device.store.mark_applied(&[seq]).unwrap();
            device.tracker.merge_remote(&seed.vector_clock).unwrap();
        }
    }
    (a, b)
}

/// Resolve `remote` against `device`'s pending ops and apply the outcome
fn receive(device: &Device, remote: Vec<Operation>) -> Option<Operation> {
    let pending = device.store.get_unsynced_by_entity().unwrap();
    let scan = detect_conflicts(remote, &pending);
    device.container.bulk_apply(&scan.clean).unwrap();

    let mut new_op = None;
    for conflict in scan.conflicts {
        let state = device.container.state().unwrap();
        let clock = device.tracker.current_clock().unwrap();
        let resolution = resolve_conflict(conflict, &state, &device.client_id, &clock);
        device.store.mark_rejected(&resolution.rejected_local).unwrap();
        device.container.bulk_apply(&resolution.remote_to_apply).unwrap();
        if let Some(op) = resolution.new_local_op {
            device.store.append_with_clock(op.clone(), OpSource::Local, &op.vector_clock).unwrap();
            device.container.bulk_apply(std::slice::from_ref(&op)).unwrap();
            new_op = Some(op);
        }
    }
    new_op
}

fn last_captured(device: &Device) -> Operation {
    device.captured().pop().unwrap()
}

#[test]
fn test_later_edit_wins_everywhere() {
    let (a, b) = seeded_pair();
    a.container.dispatch(&update_task_action("t1", "Edit on A")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    b.container.dispatch(&update_task_action("t1", "Edit on B")).unwrap();
    let a_op = last_captured(&a);
    let b_op = last_captured(&b);
    assert!(a_op.vector_clock.is_concurrent(&b_op.vector_clock));

    // B sees A's older edit: B's local edit wins and is re-issued as LWW
    let lww = receive(&b, vec![a_op]).expect("local edit should win on B");
    assert_eq!(lww.op_type, OpType::LwwUpdate);
    assert_eq!(b.title("t1").as_deref(), Some("Edit on B"));

    // A sees B's original edit: remote is newer, A's edit is rejected
    assert!(receive(&a, vec![b_op]).is_none());
    assert_eq!(a.title("t1").as_deref(), Some("Edit on B"));
    assert!(a.captured().is_empty());

    // The LWW update dominates everything A has and applies cleanly
    assert!(receive(&a, vec![lww]).is_none());
    assert_eq!(a.title("t1").as_deref(), Some("Edit on B"));
}

#[test]
fn test_lww_update_is_not_a_conflict_for_stale_pending_edit() {
    let (a, b) = seeded_pair();
    b.container.dispatch(&update_task_action("t1", "B first")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    a.container.dispatch(&update_task_action("t1", "A later")).unwrap();

    let lww = receive(&a, vec![last_captured(&b)]).expect("A's later edit wins");
    let b_pending_clock = last_captured(&b).vector_clock;
    assert!(b_pending_clock.happened_before(&lww.vector_clock));

    let pending = b.store.get_unsynced_by_entity().unwrap();
    let scan = detect_conflicts(vec![lww.clone()], &pending);
    assert!(scan.conflicts.is_empty());
    b.container.bulk_apply(&scan.clean).unwrap();
    assert_eq!(b.title("t1").as_deref(), Some("A later"));
}

#[test]
fn test_edit_beats_older_concurrent_delete() {
    let (a, b) = seeded_pair();
    a.container.dispatch(&delete_task_action("t1")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    b.container.dispatch(&update_task_action("t1", "Still needed")).unwrap();
    assert!(a.title("t1").is_none());

    let lww = receive(&b, vec![last_captured(&a)]).expect("B's edit is newer");

    // The delete already removed t1 on A; the LWW update recreates it
    assert!(receive(&a, vec![lww]).is_none());
    assert_eq!(a.title("t1").as_deref(), Some("Still needed"));
}

#[test]
fn test_newer_delete_wins_and_is_reissued() {
    let (a, b) = seeded_pair();
    b.container.dispatch(&update_task_action("t1", "Edit")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    a.container.dispatch(&delete_task_action("t1")).unwrap();

    let reissued = receive(&a, vec![last_captured(&b)]).expect("A's delete is newer");
    assert_eq!(reissued.op_type, OpType::Delete);
    assert!(a.title("t1").is_none());

    let pending = b.store.get_unsynced_by_entity().unwrap();
    let scan = detect_conflicts(vec![reissued], &pending);
    assert!(scan.conflicts.is_empty());
    b.container.bulk_apply(&scan.clean).unwrap();
    assert!(b.title("t1").is_none());
}

#[test]
fn test_local_win_keeps_other_entities_of_remote_batch() {
    let (a, b) = seeded_pair();
    let mut batch = TestOpBuilder::new("batch-1", "client-b")
        .action("[Task] Update Tasks", OpType::Batch)
        .entity(EntityType::Task, "t1")
        .payload(json!({"changes": {"done": true}}))
        .clock(&[("client-s", 2), ("client-b", 1)])
        .timestamp(1_000)
        .build();
    batch.entity_ids = Some(vec!["t1".to_string(), "t2".to_string()]);

    a.container.dispatch(&update_task_action("t1", "Edit on A")).unwrap();
    let lww = receive(&a, vec![batch.clone()]).expect("A's edit is newer");
    assert_eq!(lww.op_type, OpType::LwwUpdate);

    let done = |device: &Device, id: &str| {
        device
            .container
            .state()
            .unwrap()
            .entity(EntityType::Task, id)
            .and_then(|t| t.get("done").cloned())
    };
    // Only t1 conflicted; the batch still lands on t2
    assert_eq!(done(&a, "t2"), Some(json!(true)));
    assert_eq!(a.title("t1").as_deref(), Some("Edit on A"));

    assert!(receive(&b, vec![batch]).is_none());
    assert!(receive(&b, vec![lww]).is_none());
    for id in ["t1", "t2"] {
        let on_a = a.container.state().unwrap().entity(EntityType::Task, id).cloned();
        let on_b = b.container.state().unwrap().entity(EntityType::Task, id).cloned();
        assert_eq!(on_a, on_b, "{id} diverged");
    }
    assert_eq!(b.title("t1").as_deref(), Some("Edit on A"));
}

#[test]
fn test_identical_timestamps_resolve_to_remote() {
    let (a, b) = seeded_pair();
    a.container.dispatch(&update_task_action("t1", "A")).unwrap();
    b.container.dispatch(&update_task_action("t1", "B")).unwrap();
    let mut b_op = last_captured(&b);
    b_op.timestamp = 5_000;

    let pending = a.store.get_unsynced_by_entity().unwrap();
    let mut conflict = detect_conflicts(vec![b_op], &pending).conflicts.pop().unwrap();
    conflict.local_ops[0].timestamp = 5_000;

    let state = a.container.state().unwrap();
    let clock = a.tracker.current_clock().unwrap();
    let resolution = resolve_conflict(conflict, &state, "client-a", &clock);
    assert_eq!(resolution.winner, LwwWinner::Remote);
    assert!(resolution.new_local_op.is_none());
    assert_eq!(resolution.remote_to_apply.len(), 1);
}
