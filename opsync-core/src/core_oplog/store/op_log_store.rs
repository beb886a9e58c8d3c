/*
    op_log_store.rs - Durable operation log

    File-backed, append-only log of operations with a sequential index.
    Every mutation (append, status change, clock update) is written as one
    JSON record to the commit log; the in-memory index is rebuilt by
    replaying those records on open.

    Layout inside the data directory:
    - ops.log         commit log of LogRecords
    - snapshots/      state cache snapshots
*/

use super::commit_log::CommitLog;
use super::errors::{StoreError, StoreResult, ValidationError};
use super::snapshot::{SnapshotManager, StateCache};
use crate::core_oplog::clock::{ClockStore, VectorClock};
use crate::core_oplog::model::{
    decode_operation_with, ActionAliasTable, AppState, EntityType, Operation,
    CURRENT_SCHEMA_VERSION,
};
use crate::core_oplog::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const LOG_FILE: &str = "ops.log";
const SNAPSHOT_DIR: &str = "snapshots";
const SNAPSHOTS_KEPT: usize = 2;

/// Helper to convert poison errors into StoreError
fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Storage("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Where an operation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpSource {
    Local,
    Remote,
}

/// An operation plus its local bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct OperationLogEntry {
    /// Local sequence number, starting at 1
    pub seq: u64,
    pub op: Operation,
    pub source: OpSource,
    /// Remote ops: folded into local state
    pub applied: bool,
    /// Local ops: accepted by the server at this time
    pub synced_at: Option<u64>,
    /// Superseded by conflict resolution or refused by the server
    pub rejected_at: Option<u64>,
}

impl OperationLogEntry {
    pub fn is_pending_upload(&self) -> bool {
        self.source == OpSource::Local && self.synced_at.is_none() && self.rejected_at.is_none()
    }

    pub fn is_pending_apply(&self) -> bool {
        self.source == OpSource::Remote && !self.applied && self.rejected_at.is_none()
    }
}

/// On-disk record. Operations are kept as raw JSON so older schema
/// versions migrate on replay.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum LogRecord {
    Append {
        seq: u64,
        source: OpSource,
        #[serde(default)]
        applied: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        synced_at: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejected_at: Option<u64>,
        op: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clock: Option<VectorClock>,
    },
    MarkSynced {
        seqs: Vec<u64>,
        at: u64,
    },
    MarkApplied {
        seqs: Vec<u64>,
    },
    MarkRejected {
        op_ids: Vec<String>,
        at: u64,
    },
    Clock {
        clock: VectorClock,
    },
    /// Written first by compaction so sequence numbers never go backwards
    Checkpoint {
        next_seq: u64,
        cache_seq: u64,
        clock: VectorClock,
    },
}

impl LogRecord {
    fn append(entry: &OperationLogEntry, clock: Option<VectorClock>) -> StoreResult<Self> {
        Ok(LogRecord::Append {
            seq: entry.seq,
            source: entry.source,
            applied: entry.applied,
            synced_at: entry.synced_at,
            rejected_at: entry.rejected_at,
            op: serde_json::to_value(&entry.op)?,
            clock,
        })
    }
}

/// Result of a compaction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub removed: usize,
    pub retained: usize,
    pub cache_seq: u64,
}

struct Inner {
    log: CommitLog,
    entries: BTreeMap<u64, OperationLogEntry>,
    by_id: HashMap<String, u64>,
    next_seq: u64,
    cache_seq: u64,
    clock: VectorClock,
}

impl Inner {
    fn write(&mut self, record: &LogRecord) -> StoreResult<()> {
        let data = serde_json::to_vec(record)?;
        self.log.append(&data)?;
        Ok(())
    }

    fn apply(&mut self, record: LogRecord, aliases: &ActionAliasTable) -> StoreResult<()> {
        match record {
            LogRecord::Append { seq, source, applied, synced_at, rejected_at, op, clock } => {
                let op = decode_operation_with(op, aliases)?;
                if let Some(clock) = clock {
                    self.clock.merge(&clock);
                }
                self.next_seq = self.next_seq.max(seq + 1);
                self.by_id.insert(op.id.clone(), seq);
                self.entries.insert(
                    seq,
                    OperationLogEntry { seq, op, source, applied, synced_at, rejected_at },
                );
            }
            LogRecord::MarkSynced { seqs, at } => {
                for seq in seqs {
                    if let Some(entry) = self.entries.get_mut(&seq) {
                        entry.synced_at = Some(at);
                    }
                }
            }
            LogRecord::MarkApplied { seqs } => {
                for seq in seqs {
                    if let Some(entry) = self.entries.get_mut(&seq) {
                        entry.applied = true;
                    }
                }
            }
            LogRecord::MarkRejected { op_ids, at } => {
                for id in op_ids {
                    if let Some(entry) = self.by_id.get(&id).and_then(|s| self.entries.get_mut(s)) {
                        entry.rejected_at = Some(at);
                    }
                }
            }
            LogRecord::Clock { clock } => {
                self.clock = clock;
            }
            LogRecord::Checkpoint { next_seq, cache_seq, clock } => {
                self.next_seq = self.next_seq.max(next_seq);
                self.cache_seq = self.cache_seq.max(cache_seq);
                self.clock = clock;
            }
        }
        Ok(())
    }

    fn insert_new(
        &mut self,
        op: Operation,
        source: OpSource,
        clock: Option<VectorClock>,
    ) -> StoreResult<u64> {
        if self.by_id.contains_key(&op.id) {
            return Err(ValidationError::Duplicate(format!("operation {}", op.id)).into());
        }
        // Replay on open only understands versions up to the current one
        if op.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(ValidationError::SchemaMismatch(format!(
                "operation {} has schema version {}, expected {}",
                op.id, op.schema_version, CURRENT_SCHEMA_VERSION
            ))
            .into());
        }

        let entry = OperationLogEntry {
            seq: self.next_seq,
            op,
            source,
            applied: false,
            synced_at: None,
            rejected_at: None,
        };
        self.write(&LogRecord::append(&entry, clock.clone())?)?;

        if let Some(clock) = clock {
            self.clock.merge(&clock);
        }
        let seq = entry.seq;
        self.next_seq += 1;
        self.by_id.insert(entry.op.id.clone(), seq);
        self.entries.insert(seq, entry);
        Ok(seq)
    }
}

/// File-backed operation log
pub struct OperationLogStore {
    data_dir: PathBuf,
    inner: Mutex<Inner>,
    snapshots: SnapshotManager,
    aliases: ActionAliasTable,
}

impl OperationLogStore {
    /// Open (or create) the log in `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_aliases(data_dir, ActionAliasTable::default())
    }

    /// Open with a custom action alias table for migrating old records
    pub fn open_with_aliases(
        data_dir: impl AsRef<Path>,
        aliases: ActionAliasTable,
    ) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let log = CommitLog::new(data_dir.join(LOG_FILE))?;
        let snapshots = SnapshotManager::new(data_dir.join(SNAPSHOT_DIR))?;
        let records = log.read_all()?;

        let mut inner = Inner {
            log,
            entries: BTreeMap::new(),
            by_id: HashMap::new(),
            next_seq: 1,
            cache_seq: 0,
            clock: VectorClock::new(),
        };
        for record in &records {
            let record: LogRecord = serde_json::from_slice(&record.data)?;
            inner.apply(record, &aliases)?;
        }

        tracing::info!(
            path = %data_dir.display(),
            records = records.len(),
            ops = inner.entries.len(),
            last_seq = inner.next_seq - 1,
            "Opened operation log"
        );

        Ok(OperationLogStore {
            data_dir,
            inner: Mutex::new(inner),
            snapshots,
            aliases,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(handle_poison)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn aliases(&self) -> &ActionAliasTable {
        &self.aliases
    }

    /// Append one operation. Fails if an operation with the same id exists.
    pub fn append(&self, op: Operation, source: OpSource) -> StoreResult<u64> {
        self.lock()?.insert_new(op, source, None)
    }

    /// Append an operation together with the clock it advanced to, as one record
    pub fn append_with_clock(
        &self,
        op: Operation,
        source: OpSource,
        clock: &VectorClock,
    ) -> StoreResult<u64> {
        self.lock()?.insert_new(op, source, Some(clock.clone()))
    }

    /// Append several operations in order
    pub fn append_batch(&self, ops: Vec<Operation>, source: OpSource) -> StoreResult<Vec<u64>> {
        let mut inner = self.lock()?;
        ops.into_iter().map(|op| inner.insert_new(op, source, None)).collect()
    }

    /// Entries with a sequence greater than `seq`, in log order
    pub fn get_ops_after_seq(&self, seq: u64) -> StoreResult<Vec<OperationLogEntry>> {
        let inner = self.lock()?;
        Ok(inner.entries.range(seq + 1..).map(|(_, e)| e.clone()).collect())
    }

    /// Local operations not yet accepted by the server
    pub fn get_unsynced(&self) -> StoreResult<Vec<OperationLogEntry>> {
        let inner = self.lock()?;
        Ok(inner.entries.values().filter(|e| e.is_pending_upload()).cloned().collect())
    }

    /// Unsynced local operations grouped by the entities they touch
    pub fn get_unsynced_by_entity(
        &self,
    ) -> StoreResult<HashMap<(EntityType, String), Vec<OperationLogEntry>>> {
        let mut grouped: HashMap<(EntityType, String), Vec<OperationLogEntry>> = HashMap::new();
        for entry in self.get_unsynced()? {
            for id in entry.op.target_ids() {
                grouped.entry((entry.op.entity_type, id)).or_default().push(entry.clone());
            }
        }
        Ok(grouped)
    }

    /// Remote operations stored but not yet applied
    pub fn get_pending_remote_ops(&self) -> StoreResult<Vec<OperationLogEntry>> {
        let inner = self.lock()?;
        Ok(inner.entries.values().filter(|e| e.is_pending_apply()).cloned().collect())
    }

    pub fn get_by_id(&self, op_id: &str) -> StoreResult<Option<OperationLogEntry>> {
        let inner = self.lock()?;
        Ok(inner.by_id.get(op_id).and_then(|seq| inner.entries.get(seq)).cloned())
    }

    pub fn has_op(&self, op_id: &str) -> StoreResult<bool> {
        Ok(self.lock()?.by_id.contains_key(op_id))
    }

    /// Drop operations already in the log (and duplicates within `ops`)
    pub fn filter_new_ops(&self, ops: Vec<Operation>) -> StoreResult<Vec<Operation>> {
        let inner = self.lock()?;
        let mut seen = HashSet::new();
        Ok(ops
            .into_iter()
            .filter(|op| !inner.by_id.contains_key(&op.id) && seen.insert(op.id.clone()))
            .collect())
    }

    /// Most recent non-rejected full-state operation
    pub fn latest_full_state_op(&self) -> StoreResult<Option<OperationLogEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .values()
            .rev()
            .find(|e| e.op.op_type.is_full_state() && e.rejected_at.is_none())
            .cloned())
    }

    pub fn mark_synced(&self, seqs: &[u64]) -> StoreResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let record = LogRecord::MarkSynced { seqs: seqs.to_vec(), at: now_millis() };
        self.write_and_apply(record)
    }

    pub fn mark_applied(&self, seqs: &[u64]) -> StoreResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        self.write_and_apply(LogRecord::MarkApplied { seqs: seqs.to_vec() })
    }

    pub fn mark_rejected(&self, op_ids: &[String]) -> StoreResult<()> {
        if op_ids.is_empty() {
            return Ok(());
        }
        let record = LogRecord::MarkRejected { op_ids: op_ids.to_vec(), at: now_millis() };
        self.write_and_apply(record)
    }

    fn write_and_apply(&self, record: LogRecord) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.write(&record)?;
        inner.apply(record, &self.aliases)
    }

    /// Sequence of the newest entry, 0 when empty
    pub fn last_seq(&self) -> StoreResult<u64> {
        Ok(self.lock()?.next_seq - 1)
    }

    /// Number of entries currently held
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Merge the clocks of received operations into the stored clock
    pub fn merge_remote_op_clocks(&self, ops: &[Operation]) -> StoreResult<VectorClock> {
        let mut inner = self.lock()?;
        let mut merged = inner.clock.clone();
        for op in ops {
            merged.merge(&op.vector_clock);
        }
        if merged != inner.clock {
            let record = LogRecord::Clock { clock: merged.clone() };
            inner.write(&record)?;
            inner.clock = merged.clone();
        }
        Ok(merged)
    }

    /// Write a state cache covering everything up to the current last sequence
    pub fn save_state_cache(&self, state: &AppState) -> StoreResult<StateCache> {
        let (clock, last_seq) = {
            let inner = self.lock()?;
            (inner.clock.clone(), inner.next_seq - 1)
        };
        let cache = StateCache::new(state.clone(), clock, last_seq);
        self.snapshots.save(&cache)?;
        Ok(cache)
    }

    pub fn load_state_cache(&self) -> StoreResult<Option<StateCache>> {
        self.snapshots.load_latest()
    }

    /// Operations written since the last compaction
    pub fn ops_since_compaction(&self) -> StoreResult<u64> {
        let inner = self.lock()?;
        Ok(inner.next_seq - 1 - inner.cache_seq)
    }

    pub fn needs_compaction(&self, threshold: u64) -> StoreResult<bool> {
        Ok(self.ops_since_compaction()? >= threshold)
    }

    /// Snapshot `state` and drop operations that are no longer needed.
    ///
    /// An entry is dropped only if it is covered by the snapshot, older than
    /// `retention`, and finished: synced (local), applied (remote), or
    /// rejected. Unsynced local operations always survive.
    pub fn compact(
        &self,
        state: &AppState,
        clock: &VectorClock,
        retention: Duration,
    ) -> StoreResult<CompactionStats> {
        let mut inner = self.lock()?;
        let cache_seq = inner.next_seq - 1;
        let mut merged_clock = inner.clock.clone();
        merged_clock.merge(clock);

        self.snapshots
            .save(&StateCache::new(state.clone(), merged_clock.clone(), cache_seq))?;

        let cutoff = now_millis().saturating_sub(retention.as_millis() as u64);
        let removable: Vec<u64> = inner
            .entries
            .values()
            .filter(|e| {
                let finished = match e.source {
                    OpSource::Local => e.synced_at.is_some() || e.rejected_at.is_some(),
                    OpSource::Remote => e.applied || e.rejected_at.is_some(),
                };
                finished && e.seq <= cache_seq && e.op.timestamp < cutoff
            })
            .map(|e| e.seq)
            .collect();

        let mut records = vec![serde_json::to_vec(&LogRecord::Checkpoint {
            next_seq: inner.next_seq,
            cache_seq,
            clock: merged_clock.clone(),
        })?];
        let removable_set: HashSet<u64> = removable.iter().copied().collect();
        for entry in inner.entries.values().filter(|e| !removable_set.contains(&e.seq)) {
            records.push(serde_json::to_vec(&LogRecord::append(entry, None)?)?);
        }
        inner.log.rewrite(records.iter().map(Vec::as_slice))?;

        for seq in &removable {
            if let Some(entry) = inner.entries.remove(seq) {
                inner.by_id.remove(&entry.op.id);
            }
        }
        inner.cache_seq = cache_seq;
        inner.clock = merged_clock;

        self.snapshots.cleanup_old_snapshots(SNAPSHOTS_KEPT)?;

        let stats = CompactionStats {
            removed: removable.len(),
            retained: inner.entries.len(),
            cache_seq,
        };
        tracing::info!(
            removed = stats.removed,
            retained = stats.retained,
            cache_seq,
            "Compacted operation log"
        );
        Ok(stats)
    }
}

impl ClockStore for OperationLogStore {
    fn load_clock(&self) -> StoreResult<VectorClock> {
        Ok(self.lock()?.clock.clone())
    }

    fn save_clock(&self, clock: &VectorClock) -> StoreResult<()> {
        self.write_and_apply(LogRecord::Clock { clock: clock.clone() })
    }
}
