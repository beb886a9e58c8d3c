use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use opsync_core::core_oplog::apply::{bulk_apply, EntityReducer, LwwResolver, ReducerChain};
use opsync_core::core_oplog::model::{ActionType, EntityType, OpType, Operation, CURRENT_SCHEMA_VERSION};
use opsync_core::core_oplog::VectorClock;
use opsync_core::test_utils::task_op_sequence;
use opsync_core::AppState;
use serde_json::json;
use std::sync::Arc;

fn chain() -> ReducerChain {
    ReducerChain::new(EntityReducer).layer(LwwResolver)
}

fn bench_bulk_vs_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydration_task_ops");
    let reducer = chain();

    for count in [100u64, 1_000, 10_000].iter() {
        let ops = task_op_sequence("client-a", *count);
        group.throughput(Throughput::Elements(*count));

        group.bench_with_input(BenchmarkId::new("bulk", count), &ops, |b, ops| {
            b.iter(|| {
                let state = bulk_apply(black_box(ops), Arc::new(AppState::new()), &reducer);
                black_box(state)
            });
        });

        group.bench_with_input(BenchmarkId::new("one_at_a_time", count), &ops, |b, ops| {
            b.iter(|| {
                let state = ops.iter().try_fold(Arc::new(AppState::new()), |state, op| {
                    bulk_apply(std::slice::from_ref(op), state, &reducer)
                });
                black_box(state)
            });
        });
    }

    group.finish();
}

fn lww_op(n: u64) -> Operation {
    let task_id = format!("task-{}", n % 50);
    Operation {
        id: format!("lww-{}", n),
        action_type: ActionType::lww_update(EntityType::Task),
        op_type: OpType::LwwUpdate,
        entity_type: EntityType::Task,
        entity_id: Some(task_id.clone()),
        entity_ids: Some(vec![task_id.clone()]),
        payload: json!({"actionPayload": {"id": task_id, "title": format!("v{}", n)}, "entityChanges": []}),
        client_id: "client-b".into(),
        vector_clock: VectorClock::with_entry("client-b", n + 1),
        timestamp: n,
        schema_version: CURRENT_SCHEMA_VERSION,
        is_payload_encrypted: false,
    }
}

fn bench_lww_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydration_lww_updates");
    let reducer = chain();

    for count in [100u64, 1_000].iter() {
        let ops: Vec<Operation> = (0..*count).map(lww_op).collect();
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::new("recreate_and_overwrite", count), &ops, |b, ops| {
            b.iter(|| black_box(bulk_apply(ops, Arc::new(AppState::new()), &reducer)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_bulk_vs_single, bench_lww_updates);
criterion_main!(benches);
