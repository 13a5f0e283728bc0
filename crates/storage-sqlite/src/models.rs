//! Database models for sync state and user table rows.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};

use crate::errors::StorageError;
use tablesync_core::records::{Key, Record};
use tablesync_core::sync::{Change, ChangeKind, SyncNode};

/// Database model for the local state of one remote.
#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sync_nodes)]
pub struct SyncNodeDB {
    pub url: String,
    pub protocol: String,
    pub synced_revision: i64,
    pub connected: bool,
    pub created_at: String,
    pub last_synced_at: Option<String>,
}

impl From<&SyncNode> for SyncNodeDB {
    fn from(node: &SyncNode) -> Self {
        Self {
            url: node.url.clone(),
            protocol: node.protocol.clone(),
            synced_revision: node.synced_revision,
            connected: node.connected,
            created_at: node.created_at.to_rfc3339(),
            last_synced_at: node.last_synced_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("bad timestamp '{}': {}", value, e)))
}

impl TryFrom<SyncNodeDB> for SyncNode {
    type Error = StorageError;

    fn try_from(db: SyncNodeDB) -> Result<Self, Self::Error> {
        Ok(SyncNode {
            created_at: parse_timestamp(&db.created_at)?,
            last_synced_at: db.last_synced_at.as_deref().map(parse_timestamp).transpose()?,
            url: db.url,
            protocol: db.protocol,
            synced_revision: db.synced_revision,
            connected: db.connected,
        })
    }
}

/// A change log entry as read back from the database.
#[derive(Queryable, Debug, Clone)]
pub struct ChangeDB {
    pub rev: i64,
    pub table_name: String,
    pub record_key: String,
    pub kind: String,
    pub value: Option<String>,
}

/// A change log entry to append; the revision is assigned by SQLite.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sync_changes)]
pub struct NewChangeDB {
    pub table_name: String,
    pub record_key: String,
    pub kind: String,
    pub value: Option<String>,
}

impl TryFrom<&Change> for NewChangeDB {
    type Error = StorageError;

    fn try_from(change: &Change) -> Result<Self, Self::Error> {
        Ok(Self {
            table_name: change.table.clone(),
            record_key: encode_key(&change.key)?,
            kind: change.kind.as_str().to_string(),
            value: change.value.as_ref().map(serde_json::to_string).transpose()?,
        })
    }
}

impl TryFrom<ChangeDB> for Change {
    type Error = StorageError;

    fn try_from(db: ChangeDB) -> Result<Self, Self::Error> {
        let kind = ChangeKind::parse(&db.kind).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown change kind '{}'", db.kind))
        })?;
        Ok(Change {
            rev: db.rev,
            key: decode_key(&db.record_key)?,
            kind,
            value: db.value.as_deref().map(serde_json::from_str).transpose()?,
            table: db.table_name,
        })
    }
}

/// A row of a user table.
#[derive(QueryableByName, Debug)]
pub struct RecordRowDB {
    #[diesel(sql_type = Text)]
    pub key: String,
    #[diesel(sql_type = Text)]
    pub value: String,
}

impl RecordRowDB {
    pub fn decode(self) -> Result<(Key, Record), StorageError> {
        Ok((decode_key(&self.key)?, serde_json::from_str(&self.value)?))
    }
}

#[derive(QueryableByName, Debug)]
pub struct MaxKeyDB {
    #[diesel(sql_type = Nullable<BigInt>)]
    pub max_key: Option<i64>,
}

/// Keys are stored as their JSON encoding, which keeps `1` and `"1"` apart.
pub fn encode_key(key: &Key) -> Result<String, StorageError> {
    Ok(serde_json::to_string(key)?)
}

pub fn decode_key(raw: &str) -> Result<Key, StorageError> {
    Ok(serde_json::from_str(raw)?)
}
