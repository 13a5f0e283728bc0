use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::get_connection;
use crate::engine::HandleState;
use crate::errors::StorageError;
use crate::models::NewChangeDB;
use crate::rows;
use crate::schema::sync_changes;
use tablesync_core::errors::{DatabaseError, Result, ValidationError};
use tablesync_core::records::{Key, Record};
use tablesync_core::schema::{next_auto_key, DatabaseSchema, StoreSchema};
use tablesync_core::storage::{Table, TransactionMode, TransactionScope};
use tablesync_core::sync::Change;

/// Transaction scope running on the writer's connection.
///
/// Writes go straight to SQLite; the surrounding `IMMEDIATE` transaction is
/// what makes them atomic. Changes are collected and appended to the change
/// log by `finish`.
pub(crate) struct SqliteScope<'a> {
    conn: &'a mut SqliteConnection,
    schema: &'a DatabaseSchema,
    mode: TransactionMode,
    tables: &'a [String],
    changes: Vec<Change>,
}

impl<'a> SqliteScope<'a> {
    pub(crate) fn new(
        conn: &'a mut SqliteConnection,
        schema: &'a DatabaseSchema,
        mode: TransactionMode,
        tables: &'a [String],
    ) -> Self {
        Self {
            conn,
            schema,
            mode,
            tables,
            changes: Vec::new(),
        }
    }

    fn check_scope(&self, table: &str) -> Result<()> {
        if self.tables.iter().any(|t| t == table) {
            Ok(())
        } else {
            Err(DatabaseError::TransactionFailed(format!(
                "table '{}' is not part of the transaction",
                table
            ))
            .into())
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(DatabaseError::TransactionFailed(
                "write attempted in a read-only transaction".to_string(),
            )
            .into()),
        }
    }

    /// Appends the collected changes to the change log.
    pub(crate) fn finish(self) -> Result<()> {
        for change in &self.changes {
            let row = NewChangeDB::try_from(change)?;
            diesel::insert_into(sync_changes::table)
                .values(&row)
                .execute(self.conn)
                .map_err(StorageError::from)?;
        }
        Ok(())
    }
}

impl TransactionScope for SqliteScope<'_> {
    fn get(&mut self, table: &str, key: &Key) -> Result<Option<Record>> {
        self.check_scope(table)?;
        Ok(rows::load_row(self.conn, table, key)?)
    }

    fn put(&mut self, table: &str, mut record: Record) -> Result<Key> {
        self.ensure_writable()?;
        self.check_scope(table)?;
        if !record.is_object() {
            return Err(ValidationError::InvalidInput("records must be JSON objects".into()).into());
        }
        let schema = self.schema;
        let store = schema
            .get(table)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;

        let conn = &mut *self.conn;
        let key = store.prepare_put(&mut record, || {
            next_auto_key(rows::max_int_key(conn, table)?)
        })?;

        if store.indexes.iter().any(|i| i.unique) {
            let existing = rows::load_rows(self.conn, table)?;
            store.check_unique(&key, &record, existing.iter().map(|(k, r)| (k, r)))?;
        }

        let created = rows::load_row(self.conn, table, &key)?.is_none();
        rows::write_row(self.conn, table, &key, &record)?;
        self.changes
            .push(Change::upsert(table, key.clone(), record, created));
        Ok(key)
    }

    fn clear(&mut self, table: &str) -> Result<()> {
        self.ensure_writable()?;
        self.check_scope(table)?;
        let removed = rows::clear_rows(self.conn, table)?;
        self.changes
            .extend(removed.into_iter().map(|key| Change::delete(table, key)));
        Ok(())
    }
}

pub(crate) struct SqliteTable {
    state: Arc<HandleState>,
    store: StoreSchema,
}

impl SqliteTable {
    pub(crate) fn new(state: Arc<HandleState>, store: StoreSchema) -> Self {
        Self { state, store }
    }

    fn read_rows(&self) -> Result<Vec<(Key, Record)>> {
        let db = self.state.database()?;
        let mut conn = get_connection(&db.pool)?;
        Ok(rows::load_rows(&mut conn, &self.store.name)?)
    }
}

#[async_trait]
impl Table for SqliteTable {
    fn name(&self) -> &str {
        &self.store.name
    }

    async fn to_array(&self) -> Result<Vec<Record>> {
        Ok(self.read_rows()?.into_iter().map(|(_, r)| r).collect())
    }

    async fn get(&self, key: &Key) -> Result<Option<Record>> {
        let db = self.state.database()?;
        let mut conn = get_connection(&db.pool)?;
        Ok(rows::load_row(&mut conn, &self.store.name, key)?)
    }

    async fn where_equals(&self, index: &str, key: &Key) -> Result<Vec<Record>> {
        let index = self.store.index(index)?;
        Ok(self
            .read_rows()?
            .into_iter()
            .filter(|(_, record)| index.matches(record, key))
            .map(|(_, record)| record)
            .collect())
    }

    async fn put(&self, record: Record) -> Result<Key> {
        let table = self.store.name.clone();
        self.state
            .write(
                TransactionMode::ReadWrite,
                vec![table.clone()],
                move |scope| scope.put(&table, record),
            )
            .await
    }

    async fn clear(&self) -> Result<()> {
        let table = self.store.name.clone();
        self.state
            .write(
                TransactionMode::ReadWrite,
                vec![table.clone()],
                move |scope| scope.clear(&table),
            )
            .await
    }
}
