use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::records::{Key, Record};
use crate::schema::DatabaseSchema;
use crate::sync::Syncable;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Synchronous view of the tables inside a running transaction.
///
/// Only tables named when the transaction was opened are reachable, and
/// writes fail in read-only mode.
pub trait TransactionScope {
    fn get(&mut self, table: &str, key: &Key) -> Result<Option<Record>>;

    fn put(&mut self, table: &str, record: Record) -> Result<Key>;

    fn clear(&mut self, table: &str) -> Result<()>;
}

/// Body of a transaction. Returning an error rolls back every write it made.
pub type TransactionBody = Box<dyn FnOnce(&mut dyn TransactionScope) -> Result<()> + Send>;

/// Callback fired when opening or deleting is blocked by another connection.
pub type BlockedListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Factory for storage handles.
pub trait StorageEngine: Send + Sync {
    fn create_handle(&self, name: &str) -> Result<Arc<dyn StorageHandle>>;
}

/// One named database.
#[async_trait]
pub trait StorageHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Declares the tables. Must happen before `open`.
    fn declare_schema(&self, schema: DatabaseSchema) -> Result<()>;

    async fn open(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Deletes the database from storage. The handle is closed afterwards.
    async fn delete(&self) -> Result<()>;

    fn table(&self, name: &str) -> Result<Arc<dyn Table>>;

    /// Runs `body` atomically over `tables`: all its writes commit or none do.
    async fn transaction(
        &self,
        mode: TransactionMode,
        tables: &[String],
        body: TransactionBody,
    ) -> Result<()>;

    fn on_blocked(&self, listener: BlockedListener);

    fn syncable(&self) -> Arc<dyn Syncable>;
}

/// A table of records keyed by primary key.
#[async_trait]
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    /// All records in primary-key order.
    async fn to_array(&self) -> Result<Vec<Record>>;

    async fn get(&self, key: &Key) -> Result<Option<Record>>;

    /// Records whose `index` equals `key`, in primary-key order.
    async fn where_equals(&self, index: &str, key: &Key) -> Result<Vec<Record>>;

    async fn put(&self, record: Record) -> Result<Key>;

    async fn clear(&self) -> Result<()>;
}
