use std::sync::Arc;

use async_trait::async_trait;

use super::status::SyncStatus;
use super::sync_model::{Change, SyncNode, SyncRequest, SyncResponse};
use crate::errors::Result;

/// Callback invoked with every status transition, in emission order.
pub type StatusListener = Arc<dyn Fn(SyncStatus, &str) + Send + Sync>;

/// Synchronization sub-object of a storage handle.
#[async_trait]
pub trait Syncable: Send + Sync {
    /// Connects to `url` through the protocol registered as `protocol`.
    async fn connect(&self, protocol: &str, url: &str) -> Result<()>;

    /// Stops synchronizing with `url`; local sync state is kept.
    async fn disconnect(&self, url: &str) -> Result<()>;

    /// Drops all local sync state kept for `url`.
    async fn delete(&self, url: &str) -> Result<()>;

    /// Local changes the remote at `url` has not acknowledged yet.
    async fn unsynced_changes(&self, url: &str) -> Result<Vec<Change>>;

    fn on_status_changed(&self, listener: StatusListener);

    fn register_protocol(&self, protocol: Arc<dyn SyncProtocol>);

    /// Last status reported for `url`, if any.
    fn status(&self, url: &str) -> Option<SyncStatus>;
}

/// Wire protocol talking to a remote endpoint. Supplied by the application.
#[async_trait]
pub trait SyncProtocol: Send + Sync {
    fn name(&self) -> &str;

    async fn sync(&self, url: &str, request: SyncRequest) -> Result<SyncResponse>;
}

/// Engine-side persistence behind `SyncController`.
#[async_trait]
pub trait SyncNodeStore: Send + Sync {
    async fn load_node(&self, url: &str) -> Result<Option<SyncNode>>;

    async fn save_node(&self, node: SyncNode) -> Result<()>;

    async fn remove_node(&self, url: &str) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<SyncNode>>;

    /// Logged changes with a revision greater than `revision`, oldest first.
    async fn changes_since(&self, revision: i64) -> Result<Vec<Change>>;

    /// Removes logged changes up to and including `revision`.
    async fn prune_changes(&self, revision: i64) -> Result<()>;

    /// Applies remote changes to the tables without logging them.
    async fn apply_remote_changes(&self, changes: Vec<Change>) -> Result<()>;
}
