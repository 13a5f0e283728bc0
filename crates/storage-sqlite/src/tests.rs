//! End-to-end tests of the SQLite engine behind the core facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;

use crate::SqliteEngine;
use tablesync_core::crud::{GetByIndexRequest, GetRequest, ListRequest, PutRequest};
use tablesync_core::errors::{DatabaseError, Error, Result, ValidationError};
use tablesync_core::events::MockStatusEventSink;
use tablesync_core::storage::{StorageEngine, StorageHandle, TransactionMode, TransactionScope};
use tablesync_core::sync::{
    Change, ReconnectOutcome, ResyncRequest, SyncProtocol, SyncRequest, SyncResponse,
    UnsyncedChangesRequest,
};
use tablesync_core::{DatabaseSchema, Key, SyncStore, SyncStoreConfig};

const URL: &str = "https://x/sync";

#[derive(Default)]
struct RecordingProtocol {
    requests: Mutex<Vec<SyncRequest>>,
    remote: Mutex<Vec<Change>>,
}

#[async_trait]
impl SyncProtocol for RecordingProtocol {
    fn name(&self) -> &str {
        "iSyncRestProtocol"
    }

    async fn sync(&self, _url: &str, request: SyncRequest) -> Result<SyncResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(SyncResponse {
            remote_changes: std::mem::take(&mut *self.remote.lock().unwrap()),
        })
    }
}

fn schema() -> Result<DatabaseSchema> {
    DatabaseSchema::new()
        .store("orders", "++id,customer,*tags")?
        .store("products", "sku,&barcode")
}

async fn open_store(engine: SqliteEngine, protocol: Arc<RecordingProtocol>) -> SyncStore {
    let store = SyncStore::new(
        Arc::new(engine),
        Arc::new(MockStatusEventSink::new()),
        SyncStoreConfig::default().with_reconnect_delay(Duration::from_millis(10)),
    );
    store
        .init(
            "shop",
            Box::new(move |db: &dyn StorageHandle| {
                db.declare_schema(schema()?)?;
                db.syncable().register_protocol(protocol);
                Ok(())
            }),
            Some(false),
        )
        .await
        .unwrap();
    store
}

async fn list(store: &SyncStore, table: &str) -> Vec<serde_json::Value> {
    store.list(ListRequest::new("shop", table)).await.unwrap()
}

#[tokio::test]
async fn test_records_persist_across_engines() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(SqliteEngine::new(dir.path()), Arc::default()).await;
        for (customer, tags) in [("c2", json!(["a"])), ("c1", json!(["a", "b"]))] {
            store
                .put(PutRequest::new(
                    "shop",
                    "orders",
                    json!({ "customer": customer, "tags": tags, "$$hashKey": "object:3" }),
                ))
                .await
                .unwrap();
        }
    }
    assert!(dir.path().join("shop.db").exists());

    let store = open_store(SqliteEngine::new(dir.path()), Arc::default()).await;
    let orders = list(&store, "orders").await;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0], json!({ "id": 1, "customer": "c2", "tags": ["a"] }));

    let tagged_b = store
        .get_by_index(GetByIndexRequest::new("shop", "orders", "tags", "b"))
        .await
        .unwrap();
    assert_eq!(tagged_b.len(), 1);
    assert_eq!(tagged_b[0]["customer"], "c1");

    let key = store
        .put(PutRequest::new("shop", "orders", json!({ "customer": "c3" })))
        .await
        .unwrap();
    assert_eq!(key, Key::Int(3));
    assert!(store
        .get(GetRequest::new("shop", "orders", 9i64))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_text_keys_and_unique_indexes() {
    let dir = tempdir().unwrap();
    let store = open_store(SqliteEngine::new(dir.path()), Arc::default()).await;

    store
        .put(PutRequest::new("shop", "products", json!({ "sku": "B", "barcode": "1" })))
        .await
        .unwrap();
    store
        .put(PutRequest::new("shop", "products", json!({ "sku": "A", "barcode": "2" })))
        .await
        .unwrap();

    let err = store
        .put(PutRequest::new("shop", "products", json!({ "sku": "C", "barcode": "1" })))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Database(DatabaseError::UniqueViolation(_))
    ));

    // Overwriting a record with its own unique value is fine.
    store
        .put(PutRequest::new("shop", "products", json!({ "sku": "B", "barcode": "1", "n": 2 })))
        .await
        .unwrap();

    let skus: Vec<_> = list(&store, "products")
        .await
        .iter()
        .map(|p| p["sku"].clone())
        .collect();
    assert_eq!(skus, vec![json!("A"), json!("B")]);
}

#[tokio::test]
async fn test_auto_increment_overflow_is_rejected() {
    let dir = tempdir().unwrap();
    let store = open_store(SqliteEngine::new(dir.path()), Arc::default()).await;

    store
        .put(PutRequest::new("shop", "orders", json!({ "id": i64::MAX })))
        .await
        .unwrap();
    let err = store
        .put(PutRequest::new("shop", "orders", json!({ "customer": "y" })))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidKey(_))
    ));
    assert_eq!(list(&store, "orders").await.len(), 1);
}

#[tokio::test]
async fn test_failed_transaction_rolls_back() {
    let dir = tempdir().unwrap();
    let engine = SqliteEngine::new(dir.path());
    let store = open_store(engine, Arc::default()).await;
    store
        .put(PutRequest::new("shop", "orders", json!({ "customer": "c1" })))
        .await
        .unwrap();
    let handle = store.registry().resolve("shop").unwrap();

    let tables = vec!["orders".to_string(), "products".to_string()];
    let result = handle
        .transaction(
            TransactionMode::ReadWrite,
            &tables,
            Box::new(|scope: &mut dyn TransactionScope| {
                scope.clear("orders")?;
                scope.put("products", json!({ "name": "no sku" }))?;
                Ok(())
            }),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(list(&store, "orders").await.len(), 1);
    let pending = store
        .unsynced_changes(UnsyncedChangesRequest::new("shop", URL))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_resync_clears_tables_and_reconnects() {
    let dir = tempdir().unwrap();
    let protocol = Arc::new(RecordingProtocol::default());
    let store = open_store(SqliteEngine::new(dir.path()), protocol.clone()).await;
    let handle = store.registry().resolve("shop").unwrap();

    store
        .put(PutRequest::new("shop", "orders", json!({ "customer": "c1" })))
        .await
        .unwrap();
    handle
        .syncable()
        .connect("iSyncRestProtocol", URL)
        .await
        .unwrap();
    assert_eq!(protocol.requests.lock().unwrap()[0].changes.len(), 1);

    store
        .put(PutRequest::new("shop", "products", json!({ "sku": "A" })))
        .await
        .unwrap();

    let reconnect = store
        .resync(ResyncRequest::new("shop", vec!["orders", "products"], URL))
        .await
        .unwrap();
    assert!(list(&store, "orders").await.is_empty());
    assert!(list(&store, "products").await.is_empty());
    assert_eq!(reconnect.wait().await.unwrap(), ReconnectOutcome::Connected);

    let last = protocol.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.synced_revision, 0);
    assert!(last.changes.is_empty());
}

#[tokio::test]
async fn test_remote_changes_are_stored_without_logging() {
    let dir = tempdir().unwrap();
    let protocol = Arc::new(RecordingProtocol::default());
    protocol.remote.lock().unwrap().push(Change::upsert(
        "products",
        Key::from("R1"),
        json!({ "sku": "R1" }),
        true,
    ));
    let store = open_store(SqliteEngine::new(dir.path()), protocol).await;
    let handle = store.registry().resolve("shop").unwrap();

    handle
        .syncable()
        .connect("iSyncRestProtocol", URL)
        .await
        .unwrap();

    assert_eq!(list(&store, "products").await, vec![json!({ "sku": "R1" })]);
    assert!(handle
        .syncable()
        .unsynced_changes(URL)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_delete_removes_files_and_reports_blocked_connections() {
    let dir = tempdir().unwrap();
    let engine = SqliteEngine::new(dir.path());

    let first = engine.create_handle("shop").unwrap();
    first.declare_schema(schema().unwrap()).unwrap();
    first.open().await.unwrap();

    let second = engine.create_handle("shop").unwrap();
    second.declare_schema(schema().unwrap()).unwrap();
    second.open().await.unwrap();

    let blocked = Arc::new(AtomicUsize::new(0));
    let counter = blocked.clone();
    second.on_blocked(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    second.delete().await.unwrap();

    assert_eq!(blocked.load(Ordering::SeqCst), 1);
    assert!(!second.is_open());
    assert!(!engine.db_path("shop").exists());
    assert!(matches!(
        second.table("orders").unwrap().to_array().await,
        Err(Error::Database(DatabaseError::NotOpen(_)))
    ));

    assert!(engine.create_handle("../escape").is_err());
}
