//! Synchronization domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::SyncStatus;
use crate::records::{Key, Record};

/// Kind of a logged local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(ChangeKind::Create),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// One entry of the local change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Monotonic revision assigned by the engine; 0 for remote changes.
    pub rev: i64,
    pub table: String,
    pub key: Key,
    pub kind: ChangeKind,
    /// Record after the write; `None` for deletes.
    pub value: Option<Record>,
}

impl Change {
    pub fn upsert(table: impl Into<String>, key: Key, value: Record, created: bool) -> Self {
        Self {
            rev: 0,
            table: table.into(),
            key,
            kind: if created {
                ChangeKind::Create
            } else {
                ChangeKind::Update
            },
            value: Some(value),
        }
    }

    pub fn delete(table: impl Into<String>, key: Key) -> Self {
        Self {
            rev: 0,
            table: table.into(),
            key,
            kind: ChangeKind::Delete,
            value: None,
        }
    }
}

/// Local state of the synchronization with one remote URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNode {
    pub url: String,
    pub protocol: String,
    /// Highest local revision the remote has acknowledged.
    pub synced_revision: i64,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncNode {
    pub fn new(url: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: protocol.into(),
            synced_revision: 0,
            connected: false,
            created_at: Utc::now(),
            last_synced_at: None,
        }
    }

    /// Records a completed exchange with the remote.
    pub fn mark_synced(&mut self, revision: i64) {
        self.synced_revision = self.synced_revision.max(revision);
        self.connected = true;
        self.last_synced_at = Some(Utc::now());
    }
}

/// What the controller hands to a protocol on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub synced_revision: i64,
    pub changes: Vec<Change>,
}

/// What a protocol reports back after an exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Changes to apply locally; they are not added to the change log.
    #[serde(default)]
    pub remote_changes: Vec<Change>,
}

/// Payload broadcast to observers on every status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusEvent {
    pub status: i32,
    pub status_text: String,
    pub url: String,
}

impl SyncStatusEvent {
    pub fn new(status: SyncStatus, url: impl Into<String>) -> Self {
        Self {
            status: status.code(),
            status_text: status.text().to_string(),
            url: url.into(),
        }
    }
}

/// Table names for a resync: either a bare name or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreNames {
    One(String),
    Many(Vec<String>),
}

impl StoreNames {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StoreNames::One(name) => vec![name],
            StoreNames::Many(names) => names,
        }
    }
}

impl From<&str> for StoreNames {
    fn from(name: &str) -> Self {
        StoreNames::One(name.to_string())
    }
}

impl From<Vec<String>> for StoreNames {
    fn from(names: Vec<String>) -> Self {
        StoreNames::Many(names)
    }
}

impl From<Vec<&str>> for StoreNames {
    fn from(names: Vec<&str>) -> Self {
        StoreNames::Many(names.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncRequest {
    pub db_name: String,
    pub store_names: StoreNames,
    pub url: String,
}

impl ResyncRequest {
    pub fn new(
        db_name: impl Into<String>,
        store_names: impl Into<StoreNames>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            store_names: store_names.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsyncedChangesRequest {
    pub db_name: String,
    pub url: String,
}

impl UnsyncedChangesRequest {
    pub fn new(db_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            url: url.into(),
        }
    }
}

/// Result of a scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Connected,
    /// A newer resync of the same database and URL took over.
    Superseded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_names_accepts_string_or_list() {
        let one: ResyncRequest = serde_json::from_value(json!({
            "dbName": "shop", "storeNames": "orders", "url": "https://x/sync"
        }))
        .unwrap();
        assert_eq!(one.store_names.into_vec(), vec!["orders".to_string()]);

        let many: ResyncRequest = serde_json::from_value(json!({
            "dbName": "shop", "storeNames": ["orders", "lines"], "url": "https://x/sync"
        }))
        .unwrap();
        assert_eq!(
            many.store_names.into_vec(),
            vec!["orders".to_string(), "lines".to_string()]
        );
    }

    #[test]
    fn test_status_event_serializes_camel_case() {
        let event = SyncStatusEvent::new(SyncStatus::Online, "https://x/sync");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            json!({ "status": 2, "statusText": "ONLINE", "url": "https://x/sync" })
        );
    }

    #[test]
    fn test_mark_synced_never_moves_backwards() {
        let mut node = SyncNode::new("https://x/sync", "rest");
        node.mark_synced(10);
        node.mark_synced(4);
        assert_eq!(node.synced_revision, 10);
        assert!(node.connected);
        assert!(node.last_synced_at.is_some());
    }
}
