//! Application-facing facade.

use std::sync::Arc;

use crate::config::SyncStoreConfig;
use crate::crud::{
    CrudService, CrudServiceTrait, GetByIndexRequest, GetRequest, ListRequest, PutRequest,
};
use crate::errors::Result;
use crate::events::StatusEventSink;
use crate::records::{Key, Record};
use crate::registry::DatabaseRegistry;
use crate::storage::{StorageEngine, StorageHandle};
use crate::sync::{
    Change, ConfigureFn, ResyncRequest, ScheduledReconnect, SyncLifecycleManager, SyncStatus,
    UnsyncedChangesRequest,
};

/// Registry, CRUD operations and the sync lifecycle behind one object.
///
/// ```ignore
/// let store = SyncStore::new(Arc::new(MemoryEngine::new()), sink, SyncStoreConfig::default());
/// store
///     .init("shop", Box::new(|db| {
///         db.declare_schema(DatabaseSchema::new().store("orders", "++id,customer")?)
///     }), None)
///     .await?;
/// store.put(PutRequest::new("shop", "orders", json!({ "customer": "c1" }))).await?;
/// ```
pub struct SyncStore {
    registry: Arc<DatabaseRegistry>,
    crud: CrudService,
    lifecycle: SyncLifecycleManager,
}

impl SyncStore {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        sink: Arc<dyn StatusEventSink>,
        config: SyncStoreConfig,
    ) -> Self {
        let registry = Arc::new(DatabaseRegistry::new());
        Self {
            crud: CrudService::new(registry.clone()),
            lifecycle: SyncLifecycleManager::new(engine, registry.clone(), sink, config),
            registry,
        }
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SyncStoreConfig {
        self.lifecycle.config()
    }

    pub async fn init(
        &self,
        name: &str,
        configure: ConfigureFn,
        debug: Option<bool>,
    ) -> Result<Arc<dyn StorageHandle>> {
        self.lifecycle.init(name, configure, debug).await
    }

    pub async fn list(&self, request: ListRequest) -> Result<Vec<Record>> {
        self.crud.list(request).await
    }

    pub async fn get(&self, request: GetRequest) -> Result<Option<Record>> {
        self.crud.get(request).await
    }

    pub async fn get_by_index(&self, request: GetByIndexRequest) -> Result<Vec<Record>> {
        self.crud.get_by_index(request).await
    }

    pub async fn put(&self, request: PutRequest) -> Result<Key> {
        self.crud.put(request).await
    }

    pub async fn resync(&self, request: ResyncRequest) -> Result<ScheduledReconnect> {
        self.lifecycle.resync(request).await
    }

    pub async fn unsynced_changes(
        &self,
        request: UnsyncedChangesRequest,
    ) -> Result<Option<Vec<Change>>> {
        self.lifecycle.unsynced_changes(request).await
    }

    pub fn status(&self, db_name: &str, url: &str) -> Option<SyncStatus> {
        self.lifecycle.status(db_name, url)
    }
}
