//! Shared device setup for the integration tests

#![allow(dead_code)]

use opsync_core::core_oplog::apply::{
    EntityReducer, HydrationState, LwwResolver, ReducerChain, StateContainer,
};
use opsync_core::core_oplog::capture::OperationCapture;
use opsync_core::core_sync::{PrivateSyncConfig, SyncService};
use opsync_core::test_utils::MockTransport;
use opsync_core::{AppState, EntityType, OperationLogStore, VectorClockTracker};
use secrecy::SecretString;
use serde_json::Map;
use std::path::Path;
use std::sync::Arc;

pub struct Device {
    pub client_id: String,
    pub store: Arc<OperationLogStore>,
    pub tracker: Arc<VectorClockTracker>,
    pub container: Arc<StateContainer>,
    pub service: SyncService,
}

impl Device {
    pub fn open(client_id: &str, dir: &Path, transport: Arc<MockTransport>) -> Self {
        let store = Arc::new(OperationLogStore::open(dir).unwrap());
        let tracker = Arc::new(VectorClockTracker::new(store.clone()).unwrap());
        let hydration = HydrationState::new();
        let chain = ReducerChain::new(EntityReducer)
            .layer(OperationCapture::new(client_id, store.clone(), tracker.clone(), hydration.clone()))
            .layer(LwwResolver);
        let container = Arc::new(StateContainer::with_hydration(AppState::new(), chain, hydration));
        let service = SyncService::new(client_id, transport, store.clone(), tracker.clone(), container.clone());
        Device { client_id: client_id.to_string(), store, tracker, container, service }
    }

    pub fn title(&self, task_id: &str) -> Option<String> {
        self.container
            .state()
            .unwrap()
            .entity(EntityType::Task, task_id)
            .and_then(|t| t.get("title"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

pub fn encrypted(key: &str) -> PrivateSyncConfig {
    PrivateSyncConfig {
        encrypt_key: Some(SecretString::new(key.to_string())),
        is_encryption_enabled: true,
        extra: Map::new(),
    }
}
