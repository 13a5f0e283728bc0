//! Sync nodes and the change log, stored next to the user tables.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use log::warn;

use crate::db::get_connection;
use crate::engine::HandleState;
use crate::errors::{IntoCore, StorageError};
use crate::models::{ChangeDB, SyncNodeDB};
use crate::rows;
use crate::schema::{sync_changes, sync_nodes};
use tablesync_core::errors::Result;
use tablesync_core::sync::{Change, ChangeKind, SyncNode, SyncNodeStore};

pub(crate) struct SqliteNodeStore {
    state: Arc<HandleState>,
}

impl SqliteNodeStore {
    pub(crate) fn new(state: Arc<HandleState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl SyncNodeStore for SqliteNodeStore {
    async fn load_node(&self, url: &str) -> Result<Option<SyncNode>> {
        let db = self.state.database()?;
        let mut conn = get_connection(&db.pool)?;
        let row = sync_nodes::table
            .find(url)
            .first::<SyncNodeDB>(&mut conn)
            .optional()
            .into_core()?;
        Ok(row.map(SyncNode::try_from).transpose()?)
    }

    async fn save_node(&self, node: SyncNode) -> Result<()> {
        let row = SyncNodeDB::from(&node);
        self.state
            .database()?
            .writer
            .exec(move |conn| {
                diesel::replace_into(sync_nodes::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn remove_node(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.state
            .database()?
            .writer
            .exec(move |conn| {
                diesel::delete(sync_nodes::table.find(&url))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn list_nodes(&self) -> Result<Vec<SyncNode>> {
        let db = self.state.database()?;
        let mut conn = get_connection(&db.pool)?;
        let rows = sync_nodes::table
            .order(sync_nodes::url.asc())
            .load::<SyncNodeDB>(&mut conn)
            .into_core()?;
        Ok(rows
            .into_iter()
            .map(SyncNode::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn changes_since(&self, revision: i64) -> Result<Vec<Change>> {
        let db = self.state.database()?;
        let mut conn = get_connection(&db.pool)?;
        let rows = sync_changes::table
            .filter(sync_changes::rev.gt(revision))
            .order(sync_changes::rev.asc())
            .load::<ChangeDB>(&mut conn)
            .into_core()?;
        Ok(rows
            .into_iter()
            .map(Change::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn prune_changes(&self, revision: i64) -> Result<()> {
        self.state
            .database()?
            .writer
            .exec(move |conn| {
                diesel::delete(sync_changes::table.filter(sync_changes::rev.le(revision)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn apply_remote_changes(&self, changes: Vec<Change>) -> Result<()> {
        let schema = self.state.schema()?;
        let db_name = self.state.name().to_string();
        self.state
            .database()?
            .writer
            .exec(move |conn| {
                for change in changes {
                    if schema.get(&change.table).is_none() {
                        warn!(
                            "Ignoring remote change for unknown table '{}' in '{}'",
                            change.table, db_name
                        );
                        continue;
                    }
                    match (change.kind, &change.value) {
                        (ChangeKind::Delete, _) => {
                            rows::delete_row(conn, &change.table, &change.key)?
                        }
                        (_, Some(value)) => {
                            rows::write_row(conn, &change.table, &change.key, value)?
                        }
                        (kind, None) => warn!(
                            "Ignoring remote {} without a value for {}/{}",
                            kind.as_str(),
                            change.table,
                            change.key
                        ),
                    }
                }
                Ok(())
            })
            .await
    }
}
