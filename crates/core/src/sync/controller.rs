//! Engine-independent implementation of the synchronization sub-object.
//!
//! `SyncController` keeps the per-URL status table, the protocol registry and
//! the status listeners. Everything that has to survive a restart (sync
//! nodes, the change log) goes through the engine's `SyncNodeStore`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use log::{debug, info, warn};

use super::status::SyncStatus;
use super::sync_model::{Change, SyncNode, SyncRequest};
use super::sync_traits::{StatusListener, SyncNodeStore, SyncProtocol, Syncable};
use crate::errors::{Error, Result, SyncError};

pub struct SyncController {
    db_name: String,
    store: Arc<dyn SyncNodeStore>,
    protocols: RwLock<HashMap<String, Arc<dyn SyncProtocol>>>,
    listeners: RwLock<Vec<StatusListener>>,
    statuses: Mutex<HashMap<String, SyncStatus>>,
}

impl SyncController {
    pub fn new(db_name: impl Into<String>, store: Arc<dyn SyncNodeStore>) -> Self {
        Self {
            db_name: db_name.into(),
            store,
            protocols: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Records the new status and notifies every listener synchronously.
    fn emit(&self, status: SyncStatus, url: &str) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), status);

        // Listeners run outside the lock so they may call back into us.
        let listeners: Vec<StatusListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!("[{}] {} -> {}", self.db_name, url, status);
        for listener in listeners {
            listener(status, url);
        }
    }

    fn protocol(&self, name: &str) -> Option<Arc<dyn SyncProtocol>> {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn exchange(&self, protocol: Arc<dyn SyncProtocol>, url: &str) -> Result<()> {
        let mut node = match self.store.load_node(url).await? {
            Some(node) => node,
            None => SyncNode::new(url, protocol.name()),
        };
        node.protocol = protocol.name().to_string();

        self.emit(SyncStatus::Syncing, url);

        let changes = self.store.changes_since(node.synced_revision).await?;
        let pushed_through = changes
            .last()
            .map(|c| c.rev)
            .unwrap_or(node.synced_revision);
        debug!(
            "[{}] pushing {} change(s) to {}",
            self.db_name,
            changes.len(),
            url
        );

        let response = protocol
            .sync(
                url,
                SyncRequest {
                    synced_revision: node.synced_revision,
                    changes,
                },
            )
            .await
            .map_err(|e| match e {
                Error::Sync(err) => Error::Sync(err),
                other => SyncError::protocol(url, other.to_string()).into(),
            })?;

        if !response.remote_changes.is_empty() {
            debug!(
                "[{}] applying {} remote change(s) from {}",
                self.db_name,
                response.remote_changes.len(),
                url
            );
            self.store
                .apply_remote_changes(response.remote_changes)
                .await?;
        }

        node.mark_synced(pushed_through);
        self.store.save_node(node).await
    }
}

#[async_trait]
impl Syncable for SyncController {
    async fn connect(&self, protocol: &str, url: &str) -> Result<()> {
        let Some(protocol) = self.protocol(protocol) else {
            self.emit(SyncStatus::Error, url);
            return Err(SyncError::ProtocolNotRegistered(protocol.to_string()).into());
        };

        self.emit(SyncStatus::Connecting, url);
        match self.exchange(protocol, url).await {
            Ok(()) => {
                info!("[{}] connected to {}", self.db_name, url);
                self.emit(SyncStatus::Online, url);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] failed to connect to {}: {}", self.db_name, url, e);
                self.emit(SyncStatus::Error, url);
                Err(e)
            }
        }
    }

    async fn disconnect(&self, url: &str) -> Result<()> {
        if let Some(mut node) = self.store.load_node(url).await? {
            node.connected = false;
            self.store.save_node(node).await?;
        }
        self.emit(SyncStatus::Offline, url);
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<()> {
        if let Some(node) = self.store.load_node(url).await? {
            if node.connected {
                self.disconnect(url).await?;
            }
        }

        self.store.remove_node(url).await?;

        // Keep only what some remaining remote still has to receive.
        let floor = self
            .store
            .list_nodes()
            .await?
            .iter()
            .map(|n| n.synced_revision)
            .min()
            .unwrap_or(i64::MAX);
        self.store.prune_changes(floor).await?;

        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        info!("[{}] deleted sync state for {}", self.db_name, url);
        Ok(())
    }

    async fn unsynced_changes(&self, url: &str) -> Result<Vec<Change>> {
        let synced = self
            .store
            .load_node(url)
            .await?
            .map(|n| n.synced_revision)
            .unwrap_or(0);
        self.store.changes_since(synced).await
    }

    fn on_status_changed(&self, listener: StatusListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn register_protocol(&self, protocol: Arc<dyn SyncProtocol>) {
        let name = protocol.name().to_string();
        debug!("[{}] registering sync protocol '{}'", self.db_name, name);
        self.protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, protocol);
    }

    fn status(&self, url: &str) -> Option<SyncStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
    }
}
