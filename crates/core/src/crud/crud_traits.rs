use async_trait::async_trait;

use super::crud_model::{GetByIndexRequest, GetRequest, ListRequest, PutRequest};
use crate::errors::Result;
use crate::records::{Key, Record};

/// Trait for the record-level operations exposed to the application.
#[async_trait]
pub trait CrudServiceTrait: Send + Sync {
    /// All records of a table in primary-key order.
    async fn list(&self, request: ListRequest) -> Result<Vec<Record>>;

    async fn get(&self, request: GetRequest) -> Result<Option<Record>>;

    /// Records whose index value equals the key.
    async fn get_by_index(&self, request: GetByIndexRequest) -> Result<Vec<Record>>;

    /// Stores a sanitized copy of the value and returns its primary key.
    async fn put(&self, request: PutRequest) -> Result<Key>;
}
