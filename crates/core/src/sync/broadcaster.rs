//! Forwards synchronization status transitions to observers.

use std::sync::Arc;

use super::status::SyncStatus;
use super::sync_model::SyncStatusEvent;
use super::sync_traits::Syncable;
use crate::events::StatusEventSink;

/// Turns status transitions into named observer events.
///
/// Every transition is delivered as its own event, synchronously and in the
/// order the sync sub-object reported it.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sink: Arc<dyn StatusEventSink>,
    event_name: Arc<str>,
}

impl StatusBroadcaster {
    pub fn new(sink: Arc<dyn StatusEventSink>, event_name: impl Into<String>) -> Self {
        Self {
            sink,
            event_name: Arc::from(event_name.into()),
        }
    }

    pub fn broadcast(&self, status: SyncStatus, url: &str) {
        self.sink
            .notify_observers(&self.event_name, SyncStatusEvent::new(status, url));
    }

    /// Subscribes to every status transition of `syncable`.
    pub fn attach(&self, syncable: &dyn Syncable) {
        let broadcaster = self.clone();
        syncable.on_status_changed(Arc::new(move |status, url| {
            broadcaster.broadcast(status, url);
        }));
    }
}
