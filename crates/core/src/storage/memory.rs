//! In-memory storage engine.
//!
//! Databases live for as long as the engine does and are shared by every
//! handle opened with the same name, like files on disk. The engine keeps a
//! log of lifecycle-relevant operations (open, delete, committed write
//! transactions, sync node writes) so callers can check the order in which
//! things happened, and it can be told to fail specific operations once.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use log::{debug, warn};

use super::storage_traits::{
    BlockedListener, StorageEngine, StorageHandle, Table, TransactionBody, TransactionMode,
    TransactionScope,
};
use crate::errors::{DatabaseError, Error, Result, ValidationError};
use crate::records::{Key, Record};
use crate::schema::{next_auto_key, DatabaseSchema, StoreSchema};
use crate::sync::{Change, ChangeKind, SyncController, SyncNode, SyncNodeStore, Syncable};

type TableData = BTreeMap<Key, Record>;

/// An operation observed by the engine, in the order it completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    Opened { db: String },
    Deleted { db: String },
    TransactionCommitted { db: String, tables: Vec<String> },
    TransactionAborted { db: String, tables: Vec<String> },
    NodeSaved { db: String, url: String, connected: bool },
    NodeRemoved { db: String, url: String },
}

/// Operations that can be made to fail on their next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Open,
    Delete,
    /// Fails after the transaction body ran, before anything is committed.
    TransactionCommit,
    NodeSave,
    NodeRemove,
}

#[derive(Default)]
struct EngineShared {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    operations: Mutex<Vec<EngineOp>>,
    failures: Mutex<Vec<FailurePoint>>,
}

impl EngineShared {
    fn record(&self, op: EngineOp) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }

    fn take_failure(&self, point: FailurePoint) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.iter().position(|p| *p == point) {
            Some(index) => {
                failures.remove(index);
                true
            }
            None => false,
        }
    }
}

/// In-memory `StorageEngine`.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<EngineShared>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations recorded so far, oldest first.
    pub fn operations(&self) -> Vec<EngineOp> {
        self.shared
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_operations(&self) {
        self.shared
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Makes the next call reaching `point` fail.
    pub fn fail_next(&self, point: FailurePoint) {
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point);
    }

    /// Names of the databases currently stored.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl StorageEngine for MemoryEngine {
    fn create_handle(&self, name: &str) -> Result<Arc<dyn StorageHandle>> {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()).into());
        }

        let state = Arc::new(HandleState {
            name: name.to_string(),
            db: RwLock::new(None),
            schema: RwLock::new(None),
        });
        let node_store = Arc::new(MemoryNodeStore {
            state: state.clone(),
            shared: self.shared.clone(),
        });

        Ok(Arc::new(MemoryHandle {
            state,
            shared: self.shared.clone(),
            blocked: RwLock::new(Vec::new()),
            syncable: Arc::new(SyncController::new(name, node_store)),
        }))
    }
}

#[derive(Default)]
struct ChangeLog {
    last_rev: i64,
    entries: Vec<Change>,
}

#[derive(Default)]
struct MemoryDatabase {
    tables: RwLock<BTreeMap<String, TableData>>,
    changes: Mutex<ChangeLog>,
    nodes: Mutex<BTreeMap<String, SyncNode>>,
}

impl MemoryDatabase {
    fn read_table<R>(&self, table: &str, f: impl FnOnce(&TableData) -> R) -> Result<R> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(table)
            .map(f)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()).into())
    }

    /// Runs `body` against staged copies of `tables` and swaps them in on
    /// success. The write lock is held throughout, so readers observe either
    /// none or all of the transaction's writes.
    fn run<R, F>(
        &self,
        shared: &EngineShared,
        db_name: &str,
        schema: &DatabaseSchema,
        mode: TransactionMode,
        tables: &[String],
        body: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut MemoryScope<'_>) -> Result<R>,
    {
        if let Some(missing) = tables.iter().find(|t| schema.get(t).is_none()) {
            return Err(DatabaseError::TableNotFound(missing.clone()).into());
        }

        let mut data = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let staged = tables
            .iter()
            .map(|t| (t.clone(), data.get(t).cloned().unwrap_or_default()))
            .collect();
        let mut scope = MemoryScope {
            schema,
            mode,
            staged,
            changes: Vec::new(),
        };

        let aborted = || EngineOp::TransactionAborted {
            db: db_name.to_string(),
            tables: tables.to_vec(),
        };

        let result = match body(&mut scope) {
            Ok(result) => result,
            Err(e) => {
                shared.record(aborted());
                return Err(e);
            }
        };

        if shared.take_failure(FailurePoint::TransactionCommit) {
            shared.record(aborted());
            return Err(DatabaseError::TransactionFailed(format!(
                "commit of [{}] on '{}' failed",
                tables.join(", "),
                db_name
            ))
            .into());
        }

        if mode == TransactionMode::ReadWrite {
            let MemoryScope {
                staged, changes, ..
            } = scope;
            data.extend(staged);
            self.log_changes(changes);
            shared.record(EngineOp::TransactionCommitted {
                db: db_name.to_string(),
                tables: tables.to_vec(),
            });
        }

        Ok(result)
    }

    fn log_changes(&self, changes: Vec<Change>) {
        let mut log = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
        for mut change in changes {
            log.last_rev += 1;
            change.rev = log.last_rev;
            log.entries.push(change);
        }
    }
}

struct MemoryScope<'a> {
    schema: &'a DatabaseSchema,
    mode: TransactionMode,
    staged: BTreeMap<String, TableData>,
    changes: Vec<Change>,
}

impl MemoryScope<'_> {
    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(DatabaseError::TransactionFailed(
                "write attempted in a read-only transaction".to_string(),
            )
            .into()),
        }
    }
}

fn out_of_scope(table: &str) -> Error {
    DatabaseError::TransactionFailed(format!("table '{}' is not part of the transaction", table))
        .into()
}

impl TransactionScope for MemoryScope<'_> {
    fn get(&mut self, table: &str, key: &Key) -> Result<Option<Record>> {
        let data = self.staged.get(table).ok_or_else(|| out_of_scope(table))?;
        Ok(data.get(key).cloned())
    }

    fn put(&mut self, table: &str, mut record: Record) -> Result<Key> {
        self.ensure_writable()?;
        if !record.is_object() {
            return Err(ValidationError::InvalidInput("records must be JSON objects".into()).into());
        }

        let schema = self.schema;
        let store = schema
            .get(table)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;
        let data = self.staged.get_mut(table).ok_or_else(|| out_of_scope(table))?;

        let key = store.prepare_put(&mut record, || {
            next_auto_key(data.keys().filter_map(Key::as_int).max())
        })?;
        store.check_unique(&key, &record, data.iter())?;

        let created = data.insert(key.clone(), record.clone()).is_none();
        self.changes
            .push(Change::upsert(table, key.clone(), record, created));
        Ok(key)
    }

    fn clear(&mut self, table: &str) -> Result<()> {
        self.ensure_writable()?;
        let data = self.staged.get_mut(table).ok_or_else(|| out_of_scope(table))?;
        let removed = std::mem::take(data);
        self.changes
            .extend(removed.into_keys().map(|key| Change::delete(table, key)));
        Ok(())
    }
}

/// State shared by a handle, its tables and its node store.
struct HandleState {
    name: String,
    db: RwLock<Option<Arc<MemoryDatabase>>>,
    schema: RwLock<Option<DatabaseSchema>>,
}

impl HandleState {
    fn database(&self) -> Result<Arc<MemoryDatabase>> {
        self.db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DatabaseError::NotOpen(self.name.clone()).into())
    }

    fn schema(&self) -> Result<DatabaseSchema> {
        self.schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                DatabaseError::InvalidSchema(format!("no schema declared for '{}'", self.name))
                    .into()
            })
    }
}

pub struct MemoryHandle {
    state: Arc<HandleState>,
    shared: Arc<EngineShared>,
    blocked: RwLock<Vec<BlockedListener>>,
    syncable: Arc<SyncController>,
}

impl MemoryHandle {
    fn notify_blocked(&self) {
        let listeners = self
            .blocked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&self.state.name);
        }
    }
}

#[async_trait]
impl StorageHandle for MemoryHandle {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn declare_schema(&self, schema: DatabaseSchema) -> Result<()> {
        if self.is_open() {
            return Err(DatabaseError::InvalidSchema(
                "schema must be declared before the database is opened".to_string(),
            )
            .into());
        }
        *self
            .state
            .schema
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(schema);
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        if self.shared.take_failure(FailurePoint::Open) {
            return Err(DatabaseError::ConnectionFailed(format!(
                "failed to open '{}'",
                self.state.name
            ))
            .into());
        }
        let schema = self.state.schema()?;

        let db = self
            .shared
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.state.name.clone())
            .or_default()
            .clone();
        {
            let mut tables = db.tables.write().unwrap_or_else(PoisonError::into_inner);
            for store in schema.stores() {
                tables.entry(store.name.clone()).or_default();
            }
        }

        *self.state.db.write().unwrap_or_else(PoisonError::into_inner) = Some(db);
        self.shared.record(EngineOp::Opened {
            db: self.state.name.clone(),
        });
        debug!("Opened in-memory database '{}'", self.state.name);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state
            .db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn delete(&self) -> Result<()> {
        if self.shared.take_failure(FailurePoint::Delete) {
            return Err(DatabaseError::DeleteFailed(self.state.name.clone()).into());
        }

        let ours = self
            .state
            .db
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let removed = self
            .shared
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.state.name);

        if let Some(db) = removed {
            let own = usize::from(ours.as_ref().is_some_and(|o| Arc::ptr_eq(o, &db)));
            if Arc::strong_count(&db) > 1 + own {
                warn!(
                    "Deleting '{}' while other connections still hold it open",
                    self.state.name
                );
                self.notify_blocked();
            }
        }

        self.shared.record(EngineOp::Deleted {
            db: self.state.name.clone(),
        });
        Ok(())
    }

    fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        let schema = self.state.schema()?;
        let store = schema
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))?;

        Ok(Arc::new(MemoryTable {
            state: self.state.clone(),
            shared: self.shared.clone(),
            store,
        }))
    }

    async fn transaction(
        &self,
        mode: TransactionMode,
        tables: &[String],
        body: TransactionBody,
    ) -> Result<()> {
        let db = self.state.database()?;
        let schema = self.state.schema()?;
        db.run(
            &self.shared,
            &self.state.name,
            &schema,
            mode,
            tables,
            |scope| body(scope),
        )
    }

    fn on_blocked(&self, listener: BlockedListener) {
        self.blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn syncable(&self) -> Arc<dyn Syncable> {
        self.syncable.clone()
    }
}

struct MemoryTable {
    state: Arc<HandleState>,
    shared: Arc<EngineShared>,
    store: StoreSchema,
}

impl MemoryTable {
    fn write<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&mut MemoryScope<'_>) -> Result<R>,
    {
        let db = self.state.database()?;
        let schema = self.state.schema()?;
        db.run(
            &self.shared,
            &self.state.name,
            &schema,
            TransactionMode::ReadWrite,
            std::slice::from_ref(&self.store.name),
            body,
        )
    }
}

#[async_trait]
impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.store.name
    }

    async fn to_array(&self) -> Result<Vec<Record>> {
        self.state
            .database()?
            .read_table(&self.store.name, |data| data.values().cloned().collect())
    }

    async fn get(&self, key: &Key) -> Result<Option<Record>> {
        self.state
            .database()?
            .read_table(&self.store.name, |data| data.get(key).cloned())
    }

    async fn where_equals(&self, index: &str, key: &Key) -> Result<Vec<Record>> {
        let index = self.store.index(index)?;
        self.state.database()?.read_table(&self.store.name, |data| {
            data.values()
                .filter(|record| index.matches(record, key))
                .cloned()
                .collect()
        })
    }

    async fn put(&self, record: Record) -> Result<Key> {
        let table = self.store.name.clone();
        self.write(move |scope| scope.put(&table, record))
    }

    async fn clear(&self) -> Result<()> {
        let table = self.store.name.clone();
        self.write(move |scope| scope.clear(&table))
    }
}

struct MemoryNodeStore {
    state: Arc<HandleState>,
    shared: Arc<EngineShared>,
}

#[async_trait]
impl SyncNodeStore for MemoryNodeStore {
    async fn load_node(&self, url: &str) -> Result<Option<SyncNode>> {
        let db = self.state.database()?;
        let nodes = db.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(nodes.get(url).cloned())
    }

    async fn save_node(&self, node: SyncNode) -> Result<()> {
        if self.shared.take_failure(FailurePoint::NodeSave) {
            return Err(DatabaseError::QueryFailed(format!(
                "failed to save sync node {}",
                node.url
            ))
            .into());
        }
        let db = self.state.database()?;
        let op = EngineOp::NodeSaved {
            db: self.state.name.clone(),
            url: node.url.clone(),
            connected: node.connected,
        };
        db.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.url.clone(), node);
        self.shared.record(op);
        Ok(())
    }

    async fn remove_node(&self, url: &str) -> Result<()> {
        if self.shared.take_failure(FailurePoint::NodeRemove) {
            return Err(
                DatabaseError::QueryFailed(format!("failed to remove sync node {}", url)).into(),
            );
        }
        let db = self.state.database()?;
        db.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        self.shared.record(EngineOp::NodeRemoved {
            db: self.state.name.clone(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<SyncNode>> {
        let db = self.state.database()?;
        let nodes = db.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(nodes.values().cloned().collect())
    }

    async fn changes_since(&self, revision: i64) -> Result<Vec<Change>> {
        let db = self.state.database()?;
        let log = db.changes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .entries
            .iter()
            .filter(|c| c.rev > revision)
            .cloned()
            .collect())
    }

    async fn prune_changes(&self, revision: i64) -> Result<()> {
        let db = self.state.database()?;
        let mut log = db.changes.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.retain(|c| c.rev > revision);
        Ok(())
    }

    async fn apply_remote_changes(&self, changes: Vec<Change>) -> Result<()> {
        let db = self.state.database()?;
        let mut tables = db.tables.write().unwrap_or_else(PoisonError::into_inner);
        for change in changes {
            let Some(data) = tables.get_mut(&change.table) else {
                warn!(
                    "Ignoring remote change for unknown table '{}' in '{}'",
                    change.table, self.state.name
                );
                continue;
            };
            match (change.kind, change.value) {
                (ChangeKind::Delete, _) => {
                    data.remove(&change.key);
                }
                (_, Some(value)) => {
                    data.insert(change.key, value);
                }
                (kind, None) => {
                    warn!(
                        "Ignoring remote {} without a value for {}/{}",
                        kind.as_str(),
                        change.table,
                        change.key
                    );
                }
            }
        }
        Ok(())
    }
}
