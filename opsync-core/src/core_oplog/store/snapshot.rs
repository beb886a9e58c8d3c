/*
    snapshot.rs - State cache snapshots for fast startup

    Periodically writes the full application state plus the vector clock
    and the log sequence it covers. On startup the latest snapshot is
    loaded and only operations after its sequence are replayed.

    Features:
    - Atomic snapshot creation (write to temp, then rename)
    - Versioned snapshots with metadata
    - Cleanup of old snapshots
*/

use super::errors::StoreResult;
use crate::core_oplog::clock::VectorClock;
use crate::core_oplog::model::{AppState, CURRENT_SCHEMA_VERSION};
use crate::core_oplog::now_millis;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::PathBuf;

const SNAPSHOT_PREFIX: &str = "state_cache_";
const SNAPSHOT_EXT: &str = "json";

/// Snapshot metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Last operation log sequence folded into the state
    pub last_applied_seq: u64,

    /// Creation time in milliseconds
    pub created_at: u64,

    /// Schema version of the operations the state was built from
    pub schema_version: u32,

    /// Number of collection entities
    pub entity_count: usize,
}

/// Cached state plus the clock it corresponds to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCache {
    pub metadata: SnapshotMetadata,
    pub state: AppState,
    pub vector_clock: VectorClock,
}

impl StateCache {
    pub fn new(state: AppState, vector_clock: VectorClock, last_applied_seq: u64) -> Self {
        StateCache {
            metadata: SnapshotMetadata {
                last_applied_seq,
                created_at: now_millis(),
                schema_version: CURRENT_SCHEMA_VERSION,
                entity_count: state.entity_count(),
            },
            state,
            vector_clock,
        }
    }
}

/// Manages state cache files in one directory
pub struct SnapshotManager {
    snapshots_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(snapshots_dir: PathBuf) -> StoreResult<Self> {
        create_dir_all(&snapshots_dir)?;
        Ok(SnapshotManager { snapshots_dir })
    }

    /// Write a new snapshot
    pub fn save(&self, cache: &StateCache) -> StoreResult<PathBuf> {
        let data = serde_json::to_vec(cache)?;
        let name = format!("{}{:020}", SNAPSHOT_PREFIX, cache.metadata.last_applied_seq);

        // Write to temporary file first
        let temp_path = self.snapshots_dir.join(format!("{}.tmp", name));
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        // Atomically rename to final name
        let final_path = self.snapshots_dir.join(format!("{}.{}", name, SNAPSHOT_EXT));
        std::fs::rename(&temp_path, &final_path)?;

        tracing::debug!(
            path = %final_path.display(),
            seq = cache.metadata.last_applied_seq,
            entities = cache.metadata.entity_count,
            "Saved state cache"
        );
        Ok(final_path)
    }

    /// Load the latest snapshot, if any
    pub fn load_latest(&self) -> StoreResult<Option<StateCache>> {
        let Some(latest) = self.snapshot_files()?.pop() else {
            return Ok(None);
        };
        let data = std::fs::read(&latest)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Remove old snapshots, keeping only the `keep_count` most recent
    pub fn cleanup_old_snapshots(&self, keep_count: usize) -> StoreResult<usize> {
        let snapshots = self.snapshot_files()?;
        if snapshots.len() <= keep_count {
            return Ok(0);
        }

        let remove = snapshots.len() - keep_count;
        for path in snapshots.iter().take(remove) {
            std::fs::remove_file(path)?;
        }
        Ok(remove)
    }

    /// Snapshot files sorted oldest first
    fn snapshot_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut snapshots: Vec<PathBuf> = std::fs::read_dir(&self.snapshots_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXT)
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX))
            })
            .collect();

        // Zero-padded sequence numbers sort lexically
        snapshots.sort();
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::model::EntityType;
    use serde_json::json;
    use tempfile::tempdir;

    fn state_with_task(id: &str) -> AppState {
        let mut state = AppState::new();
        state
            .collection_mut(EntityType::Task)
            .unwrap()
            .upsert(id.to_string(), json!({"id": id}).as_object().cloned().unwrap());
        state
    }

    #[test]
    fn test_load_latest_empty() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();

        let older = StateCache::new(state_with_task("t1"), VectorClock::with_entry("a", 1), 3);
        let newer = StateCache::new(state_with_task("t2"), VectorClock::with_entry("a", 9), 12);
        manager.save(&newer).unwrap();
        manager.save(&older).unwrap();

        let loaded = manager.load_latest().unwrap().unwrap();
        assert_eq!(loaded, newer);
        assert_eq!(loaded.metadata.entity_count, 1);
        assert_eq!(loaded.metadata.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_cleanup_old_snapshots() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();

        for seq in 0..5 {
            manager.save(&StateCache::new(AppState::new(), VectorClock::new(), seq)).unwrap();
        }

        assert_eq!(manager.cleanup_old_snapshots(2).unwrap(), 3);
        assert_eq!(manager.snapshot_files().unwrap().len(), 2);
        assert_eq!(manager.load_latest().unwrap().unwrap().metadata.last_applied_seq, 4);
    }
}
