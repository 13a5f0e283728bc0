//! Lifecycle scenarios against the in-memory engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::config::SyncStoreConfig;
use crate::crud::{ListRequest, PutRequest};
use crate::errors::{DatabaseError, Error, Result, SyncError, ValidationError};
use crate::events::MockStatusEventSink;
use crate::records::Key;
use crate::schema::DatabaseSchema;
use crate::storage::{EngineOp, FailurePoint, MemoryEngine, StorageHandle};
use crate::store::SyncStore;

const URL: &str = "https://x/sync";
const PROTOCOL: &str = "iSyncRestProtocol";

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct StubProtocol {
    requests: Mutex<Vec<SyncRequest>>,
    remote: Mutex<Vec<Change>>,
    fail: AtomicBool,
}

impl StubProtocol {
    fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncProtocol for StubProtocol {
    fn name(&self) -> &str {
        PROTOCOL
    }

    async fn sync(&self, _url: &str, request: SyncRequest) -> Result<SyncResponse> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Unexpected("remote unavailable".to_string()));
        }
        self.requests.lock().unwrap().push(request);
        Ok(SyncResponse {
            remote_changes: std::mem::take(&mut *self.remote.lock().unwrap()),
        })
    }
}

struct Fixture {
    engine: MemoryEngine,
    sink: MockStatusEventSink,
    store: Arc<SyncStore>,
    protocol: Arc<StubProtocol>,
    handle: Arc<dyn StorageHandle>,
}

fn shop_schema() -> Result<DatabaseSchema> {
    DatabaseSchema::new()
        .store("orders", "++id,customer")?
        .store("lines", "++id,orderId")
}

fn configure(protocol: Arc<StubProtocol>) -> ConfigureFn {
    Box::new(move |db: &dyn StorageHandle| {
        db.declare_schema(shop_schema()?)?;
        db.syncable().register_protocol(protocol);
        Ok(())
    })
}

async fn fixture_with_delay(delay: Duration) -> Fixture {
    let engine = MemoryEngine::new();
    let sink = MockStatusEventSink::new();
    let config = SyncStoreConfig::default().with_reconnect_delay(delay);
    let store = Arc::new(SyncStore::new(
        Arc::new(engine.clone()),
        Arc::new(sink.clone()),
        config,
    ));
    let protocol = Arc::new(StubProtocol::default());

    let handle = store
        .init("shop", configure(protocol.clone()), Some(false))
        .await
        .unwrap();

    Fixture {
        engine,
        sink,
        store,
        protocol,
        handle,
    }
}

async fn fixture() -> Fixture {
    fixture_with_delay(Duration::from_millis(10)).await
}

async fn seed(store: &SyncStore) {
    for customer in ["c1", "c2"] {
        store
            .put(PutRequest::new("shop", "orders", json!({ "customer": customer })))
            .await
            .unwrap();
    }
    store
        .put(PutRequest::new("shop", "lines", json!({ "orderId": 1 })))
        .await
        .unwrap();
}

async fn count(store: &SyncStore, table: &str) -> usize {
    store
        .list(ListRequest::new("shop", table))
        .await
        .unwrap()
        .len()
}

fn position(ops: &[EngineOp], predicate: impl Fn(&EngineOp) -> bool) -> usize {
    ops.iter()
        .position(predicate)
        .unwrap_or_else(|| panic!("operation not found in {:?}", ops))
}

fn statuses(sink: &MockStatusEventSink) -> Vec<i32> {
    sink.events().iter().map(|e| e.status).collect()
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test]
async fn test_resync_clears_tables_and_reconnects_in_order() {
    let f = fixture().await;
    seed(&f.store).await;
    f.handle.syncable().connect(PROTOCOL, URL).await.unwrap();
    f.engine.clear_operations();
    f.sink.clear();

    let reconnect = f
        .store
        .resync(ResyncRequest::new("shop", vec!["orders", "lines"], URL))
        .await
        .unwrap();

    assert_eq!(count(&f.store, "orders").await, 0);
    assert_eq!(count(&f.store, "lines").await, 0);
    assert_eq!(reconnect.wait().await.unwrap(), ReconnectOutcome::Connected);

    let ops = f.engine.operations();
    let disconnected = position(&ops, |op| {
        matches!(op, EngineOp::NodeSaved { connected: false, .. })
    });
    let cleared = position(&ops, |op| {
        matches!(op, EngineOp::TransactionCommitted { tables, .. }
            if tables == &["orders".to_string(), "lines".to_string()])
    });
    let removed = position(&ops, |op| matches!(op, EngineOp::NodeRemoved { .. }));
    let reconnected = position(&ops, |op| {
        matches!(op, EngineOp::NodeSaved { connected: true, .. })
    });
    assert!(disconnected < cleared);
    assert!(cleared < removed);
    assert!(removed < reconnected);

    assert_eq!(statuses(&f.sink), vec![0, 1, 3, 2]);
    assert_eq!(f.store.status("shop", URL), Some(SyncStatus::Online));

    // The change log was dropped with the sync state, so nothing is re-sent.
    let last = f.protocol.requests().pop().unwrap();
    assert_eq!(last.synced_revision, 0);
    assert!(last.changes.is_empty());
}

#[tokio::test]
async fn test_resync_accepts_a_single_store_name() {
    let f = fixture().await;
    seed(&f.store).await;

    let reconnect = f
        .store
        .resync(ResyncRequest::new("shop", "orders", URL))
        .await
        .unwrap();

    assert_eq!(count(&f.store, "orders").await, 0);
    assert_eq!(count(&f.store, "lines").await, 1);
    reconnect.wait().await.unwrap();
}

#[tokio::test]
async fn test_failed_clear_leaves_tables_intact_and_skips_the_rest() {
    let f = fixture().await;
    seed(&f.store).await;
    f.engine.clear_operations();
    f.engine.fail_next(FailurePoint::TransactionCommit);

    let err = f
        .store
        .resync(ResyncRequest::new("shop", vec!["orders", "lines"], URL))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Database(DatabaseError::TransactionFailed(_))
    ));
    assert_eq!(count(&f.store, "orders").await, 2);
    assert_eq!(count(&f.store, "lines").await, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let ops = f.engine.operations();
    assert!(!ops.iter().any(|op| matches!(op, EngineOp::NodeRemoved { .. })));
    assert!(!ops.iter().any(|op| matches!(op, EngineOp::NodeSaved { .. })));
    assert_eq!(statuses(&f.sink), vec![0]);
}

#[tokio::test]
async fn test_unknown_store_aborts_before_clearing() {
    let f = fixture().await;
    seed(&f.store).await;
    f.engine.clear_operations();

    let err = f
        .store
        .resync(ResyncRequest::new("shop", vec!["orders", "nope"], URL))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Database(DatabaseError::TableNotFound(_))));
    assert_eq!(count(&f.store, "orders").await, 2);
    assert!(!f
        .engine
        .operations()
        .iter()
        .any(|op| matches!(op, EngineOp::TransactionCommitted { .. })));
}

#[tokio::test]
async fn test_resync_rejects_bad_requests() {
    let f = fixture().await;

    let err = f
        .store
        .resync(ResyncRequest::new("shop", Vec::<String>::new(), URL))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::MissingField(_))));

    let err = f
        .store
        .resync(ResyncRequest::new("other", "orders", URL))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DatabaseNotFound(name) if name == "other"));
}

#[tokio::test]
async fn test_newer_resync_supersedes_pending_reconnect() {
    let f = fixture_with_delay(Duration::from_millis(100)).await;

    let first = f
        .store
        .resync(ResyncRequest::new("shop", "orders", URL))
        .await
        .unwrap();
    let second = f
        .store
        .resync(ResyncRequest::new("shop", "orders", URL))
        .await
        .unwrap();

    assert_eq!(first.wait().await.unwrap(), ReconnectOutcome::Superseded);
    assert_eq!(second.wait().await.unwrap(), ReconnectOutcome::Connected);
    assert_eq!(f.protocol.requests().len(), 1);
}

#[tokio::test]
async fn test_failed_resync_keeps_pending_reconnect() {
    let f = fixture_with_delay(Duration::from_millis(100)).await;

    let first = f
        .store
        .resync(ResyncRequest::new("shop", "orders", URL))
        .await
        .unwrap();
    let err = f
        .store
        .resync(ResyncRequest::new("shop", vec!["orders", "nope"], URL))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Database(DatabaseError::TableNotFound(name)) if name == "nope"
    ));

    assert_eq!(first.wait().await.unwrap(), ReconnectOutcome::Connected);
    assert_eq!(f.protocol.requests().len(), 1);
    assert_eq!(f.store.status("shop", URL), Some(SyncStatus::Online));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_resyncs_do_not_interleave() {
    let f = fixture().await;
    seed(&f.store).await;
    f.handle.syncable().connect(PROTOCOL, URL).await.unwrap();
    f.engine.clear_operations();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let store = f.store.clone();
            tokio::spawn(async move {
                store
                    .resync(ResyncRequest::new("shop", vec!["orders", "lines"], URL))
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        let reconnect = task.await.unwrap().unwrap();
        outcomes.push(reconnect.wait().await.unwrap());
    }
    assert!(outcomes.contains(&ReconnectOutcome::Connected));

    let steps: Vec<&str> = f
        .engine
        .operations()
        .iter()
        .filter_map(|op| match op {
            EngineOp::TransactionCommitted { .. } => Some("clear"),
            EngineOp::NodeRemoved { .. } => Some("delete"),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec!["clear", "delete", "clear", "delete"]);
    assert_eq!(f.store.status("shop", URL), Some(SyncStatus::Online));
}

#[tokio::test]
async fn test_failed_reconnect_is_reported_by_wait() {
    let f = fixture().await;
    f.protocol.fail.store(true, Ordering::SeqCst);

    let reconnect = f
        .store
        .resync(ResyncRequest::new("shop", "orders", URL))
        .await
        .unwrap();

    let err = reconnect.wait().await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::Protocol { .. })));
    assert_eq!(f.store.status("shop", URL), Some(SyncStatus::Error));
}

// ============================================================================
// Init
// ============================================================================

#[tokio::test]
async fn test_debug_init_deletes_once_before_configure_and_open() {
    let f = fixture().await;
    seed(&f.store).await;

    let store = SyncStore::new(
        Arc::new(f.engine.clone()),
        Arc::new(MockStatusEventSink::new()),
        SyncStoreConfig::default(),
    );
    f.engine.clear_operations();

    let engine = f.engine.clone();
    let deleted_before_configure = Arc::new(AtomicBool::new(false));
    let seen = deleted_before_configure.clone();
    store
        .init(
            "shop",
            Box::new(move |db: &dyn StorageHandle| {
                let deleted = engine
                    .operations()
                    .contains(&EngineOp::Deleted { db: "shop".into() });
                seen.store(deleted, Ordering::SeqCst);
                db.declare_schema(shop_schema()?)
            }),
            Some(true),
        )
        .await
        .unwrap();

    let ops = f.engine.operations();
    assert_eq!(
        ops,
        vec![
            EngineOp::Deleted { db: "shop".into() },
            EngineOp::Opened { db: "shop".into() },
        ]
    );
    assert!(deleted_before_configure.load(Ordering::SeqCst));
    assert_eq!(count(&store, "orders").await, 0);
}

#[tokio::test]
async fn test_debug_delete_failure_does_not_fail_init() {
    let engine = MemoryEngine::new();
    engine.fail_next(FailurePoint::Delete);
    let store = SyncStore::new(
        Arc::new(engine.clone()),
        Arc::new(MockStatusEventSink::new()),
        SyncStoreConfig::default().with_debug(true),
    );

    let handle = store
        .init("shop", configure(Arc::new(StubProtocol::default())), None)
        .await
        .unwrap();

    assert!(handle.is_open());
    assert!(!engine
        .operations()
        .iter()
        .any(|op| matches!(op, EngineOp::Deleted { .. })));
}

#[tokio::test]
async fn test_init_propagates_configure_and_duplicate_errors() {
    let f = fixture().await;

    let err = f
        .store
        .init("shop", configure(f.protocol.clone()), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::DuplicateDatabase(_)));

    let err = f
        .store
        .init(
            "broken",
            Box::new(|db: &dyn StorageHandle| {
                db.declare_schema(DatabaseSchema::new().store("bad", "[a+b]")?)
            }),
            None,
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Database(DatabaseError::InvalidSchema(_))));
}

// ============================================================================
// Sync sub-object
// ============================================================================

#[tokio::test]
async fn test_connect_reports_statuses_to_observers() {
    let f = fixture().await;
    f.sink.clear();

    f.handle.syncable().connect(PROTOCOL, URL).await.unwrap();

    let notifications = f.sink.notifications();
    assert!(notifications
        .iter()
        .all(|n| n.event_name == "syncStatusChanged" && n.payload.url == URL));
    assert_eq!(
        notifications
            .iter()
            .map(|n| n.payload.status_text.as_str())
            .collect::<Vec<_>>(),
        vec!["CONNECTING", "SYNCING", "ONLINE"]
    );
}

#[tokio::test]
async fn test_connect_failures_end_in_error_status() {
    let f = fixture().await;

    let err = f
        .handle
        .syncable()
        .connect("otherProtocol", URL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Sync(SyncError::ProtocolNotRegistered(_))
    ));
    assert_eq!(f.store.status("shop", URL), Some(SyncStatus::Error));

    f.protocol.fail.store(true, Ordering::SeqCst);
    f.sink.clear();
    let err = f.handle.syncable().connect(PROTOCOL, URL).await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::Protocol { .. })));
    assert_eq!(statuses(&f.sink), vec![1, 3, -1]);
}

#[tokio::test]
async fn test_remote_changes_are_applied_but_not_logged() {
    let f = fixture().await;
    f.protocol.remote.lock().unwrap().push(Change::upsert(
        "orders",
        Key::Int(100),
        json!({ "id": 100, "customer": "remote" }),
        true,
    ));

    f.handle.syncable().connect(PROTOCOL, URL).await.unwrap();

    assert_eq!(count(&f.store, "orders").await, 1);
    let pending = f
        .store
        .unsynced_changes(UnsyncedChangesRequest::new("shop", URL))
        .await
        .unwrap()
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_unsynced_changes() {
    let f = fixture().await;
    seed(&f.store).await;

    let pending = f
        .store
        .unsynced_changes(UnsyncedChangesRequest::new("shop", URL))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|c| c.kind == ChangeKind::Create));

    f.handle.syncable().connect(PROTOCOL, URL).await.unwrap();
    assert_eq!(f.protocol.requests()[0].changes.len(), 3);
    let pending = f
        .store
        .unsynced_changes(UnsyncedChangesRequest::new("shop", URL))
        .await
        .unwrap()
        .unwrap();
    assert!(pending.is_empty());

    let unknown = f
        .store
        .unsynced_changes(UnsyncedChangesRequest::new("nope", URL))
        .await
        .unwrap();
    assert!(unknown.is_none());

    f.handle.delete().await.unwrap();
    let closed = f
        .store
        .unsynced_changes(UnsyncedChangesRequest::new("shop", URL))
        .await
        .unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_deleting_a_node_keeps_changes_other_nodes_still_need() {
    let f = fixture().await;
    let syncable = f.handle.syncable();
    let other = "https://y/sync";

    seed(&f.store).await;
    syncable.connect(PROTOCOL, URL).await.unwrap();
    f.store
        .put(PutRequest::new("shop", "orders", json!({ "customer": "c3" })))
        .await
        .unwrap();
    syncable.connect(PROTOCOL, other).await.unwrap();
    f.store
        .put(PutRequest::new("shop", "orders", json!({ "customer": "c4" })))
        .await
        .unwrap();

    syncable.delete(other).await.unwrap();

    let pending = syncable.unsynced_changes(URL).await.unwrap();
    assert_eq!(pending.iter().map(|c| c.rev).collect::<Vec<_>>(), vec![4, 5]);
    assert_eq!(syncable.status(other), None);
}
