//! SQLite storage engine.
//!
//! Each database is a file `<data_dir>/<name>.db`. Reads go through an r2d2
//! pool; every write, including whole transactions, runs on the database's
//! single writer actor inside an `IMMEDIATE` transaction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::db::{
    create_pool, get_connection, get_db_path, prepare_database, remove_database_files,
    run_migrations, spawn_writer, DbPool, WriteHandle,
};
use crate::rows;
use crate::sync_store::SqliteNodeStore;
use crate::table::{SqliteScope, SqliteTable};
use tablesync_core::errors::{DatabaseError, Result, ValidationError};
use tablesync_core::schema::DatabaseSchema;
use tablesync_core::storage::{
    BlockedListener, StorageEngine, StorageHandle, Table, TransactionBody, TransactionMode,
};
use tablesync_core::sync::{SyncController, Syncable};

type OpenCounts = Arc<Mutex<HashMap<String, usize>>>;

/// `StorageEngine` keeping each database in its own SQLite file.
#[derive(Clone)]
pub struct SqliteEngine {
    data_dir: PathBuf,
    open_counts: OpenCounts,
}

impl SqliteEngine {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            open_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file backing the database `name`.
    pub fn db_path(&self, name: &str) -> PathBuf {
        get_db_path(&self.data_dir, name)
    }
}

impl StorageEngine for SqliteEngine {
    fn create_handle(&self, name: &str) -> Result<Arc<dyn StorageHandle>> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid || name.starts_with('.') {
            return Err(ValidationError::InvalidInput(format!(
                "'{}' cannot be used as a database file name",
                name
            ))
            .into());
        }

        let state = Arc::new(HandleState {
            name: name.to_string(),
            path: self.db_path(name),
            schema: RwLock::new(None),
            db: RwLock::new(None),
            open_counts: self.open_counts.clone(),
        });
        let node_store = Arc::new(SqliteNodeStore::new(state.clone()));

        Ok(Arc::new(SqliteHandle {
            syncable: Arc::new(SyncController::new(name, node_store)),
            state,
            blocked: RwLock::new(Vec::new()),
        }))
    }
}

pub(crate) struct OpenDatabase {
    pub(crate) pool: Arc<DbPool>,
    pub(crate) writer: WriteHandle,
}

/// State shared by a handle, its tables and its node store.
pub(crate) struct HandleState {
    name: String,
    path: PathBuf,
    schema: RwLock<Option<DatabaseSchema>>,
    db: RwLock<Option<Arc<OpenDatabase>>>,
    open_counts: OpenCounts,
}

impl HandleState {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn database(&self) -> Result<Arc<OpenDatabase>> {
        self.db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DatabaseError::NotOpen(self.name.clone()).into())
    }

    pub(crate) fn schema(&self) -> Result<DatabaseSchema> {
        self.schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                DatabaseError::InvalidSchema(format!("no schema declared for '{}'", self.name))
                    .into()
            })
    }

    /// Runs `body` on the writer inside one transaction and appends the
    /// changes it made to the change log before committing.
    pub(crate) async fn write<R, F>(
        &self,
        mode: TransactionMode,
        tables: Vec<String>,
        body: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut SqliteScope<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.database()?;
        let schema = self.schema()?;
        if let Some(missing) = tables.iter().find(|t| schema.get(t).is_none()) {
            return Err(DatabaseError::TableNotFound(missing.clone()).into());
        }

        db.writer
            .exec(move |conn| {
                let mut scope = SqliteScope::new(conn, &schema, mode, &tables);
                let result = body(&mut scope)?;
                scope.finish()?;
                Ok(result)
            })
            .await
    }
}

pub struct SqliteHandle {
    state: Arc<HandleState>,
    blocked: RwLock<Vec<BlockedListener>>,
    syncable: Arc<SyncController>,
}

impl SqliteHandle {
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

    fn open_counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.state
            .open_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StorageHandle for SqliteHandle {
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
        if self.is_open() {
            return Ok(());
        }
        let schema = self.state.schema()?;

        let db_url = prepare_database(&self.state.path)?;
        let pool = create_pool(&db_url)?;
        run_migrations(&pool)?;
        {
            let mut conn = get_connection(&pool)?;
            for store in schema.stores() {
                rows::create_table(&mut conn, &store.name)?;
            }
        }

        let writer = spawn_writer(pool.as_ref().clone());
        *self.state.db.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(OpenDatabase { pool, writer }));
        *self
            .open_counts()
            .entry(self.state.name.clone())
            .or_insert(0) += 1;

        info!("Opened SQLite database '{}' at {}", self.state.name, db_url);
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
        let was_open = self
            .state
            .db
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();

        let still_open = {
            let mut counts = self.open_counts();
            let count = counts.entry(self.state.name.clone()).or_insert(0);
            if was_open {
                *count = count.saturating_sub(1);
            }
            let remaining = *count;
            if remaining == 0 {
                counts.remove(&self.state.name);
            }
            remaining
        };
        if still_open > 0 {
            warn!(
                "Deleting '{}' while {} other connection(s) still hold it open",
                self.state.name, still_open
            );
            self.notify_blocked();
        }

        remove_database_files(&self.state.path)?;
        debug!("Deleted SQLite database '{}'", self.state.name);
        Ok(())
    }

    fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        let store = self
            .state
            .schema()?
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))?;
        Ok(Arc::new(SqliteTable::new(self.state.clone(), store)))
    }

    async fn transaction(
        &self,
        mode: TransactionMode,
        tables: &[String],
        body: TransactionBody,
    ) -> Result<()> {
        self.state
            .write(mode, tables.to_vec(), move |scope| body(scope))
            .await
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
