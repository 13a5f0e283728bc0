use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::crud_model::{GetByIndexRequest, GetRequest, ListRequest, PutRequest};
use super::crud_traits::CrudServiceTrait;
use crate::errors::Result;
use crate::records::{sanitize_record, Key, Record};
use crate::registry::DatabaseRegistry;
use crate::storage::Table;

pub struct CrudService {
    registry: Arc<DatabaseRegistry>,
}

impl CrudService {
    pub fn new(registry: Arc<DatabaseRegistry>) -> Self {
        Self { registry }
    }

    fn table(&self, db_name: &str, store_name: &str) -> Result<Arc<dyn Table>> {
        self.registry.require(db_name)?.table(store_name)
    }
}

#[async_trait]
impl CrudServiceTrait for CrudService {
    async fn list(&self, request: ListRequest) -> Result<Vec<Record>> {
        self.table(&request.db_name, &request.store_name)?
            .to_array()
            .await
    }

    async fn get(&self, request: GetRequest) -> Result<Option<Record>> {
        self.table(&request.db_name, &request.store_name)?
            .get(&request.key)
            .await
    }

    async fn get_by_index(&self, request: GetByIndexRequest) -> Result<Vec<Record>> {
        self.table(&request.db_name, &request.store_name)?
            .where_equals(&request.index, &request.key)
            .await
    }

    async fn put(&self, request: PutRequest) -> Result<Key> {
        let table = self.table(&request.db_name, &request.store_name)?;
        let record = sanitize_record(&request.value)?;
        let key = table.put(record).await?;
        debug!(
            "Stored {}/{} under key {}",
            request.db_name, request.store_name, key
        );
        Ok(key)
    }
}
