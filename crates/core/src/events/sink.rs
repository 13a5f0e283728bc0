//! Status event sink trait and implementations.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::sync::SyncStatusEvent;

/// Observer channel of the host application.
///
/// # Design Rules
///
/// - `notify_observers()` is called synchronously, once per transition, in
///   the order the transitions happened
/// - It must not block on I/O; implementations queue when they need to
/// - It must not drop events
pub trait StatusEventSink: Send + Sync {
    fn notify_observers(&self, event_name: &str, event: SyncStatusEvent);
}

/// A named event as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverNotification {
    pub event_name: String,
    pub payload: SyncStatusEvent,
}

/// No-op implementation for contexts without observers.
#[derive(Clone, Default)]
pub struct NoOpStatusEventSink;

impl StatusEventSink for NoOpStatusEventSink {
    fn notify_observers(&self, _event_name: &str, _event: SyncStatusEvent) {}
}

/// Forwards notifications into an unbounded channel drained by the host.
#[derive(Clone)]
pub struct ChannelStatusEventSink {
    tx: mpsc::UnboundedSender<ObserverNotification>,
}

impl ChannelStatusEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusEventSink for ChannelStatusEventSink {
    fn notify_observers(&self, event_name: &str, event: SyncStatusEvent) {
        let notification = ObserverNotification {
            event_name: event_name.to_string(),
            payload: event,
        };
        if self.tx.send(notification).is_err() {
            log::debug!("Status observer channel closed; notification discarded");
        }
    }
}

/// Mock sink for testing - collects notifications.
#[derive(Clone, Default)]
pub struct MockStatusEventSink {
    notifications: Arc<Mutex<Vec<ObserverNotification>>>,
}

impl MockStatusEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected notifications.
    pub fn notifications(&self) -> Vec<ObserverNotification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns only the payloads, in delivery order.
    pub fn events(&self) -> Vec<SyncStatusEvent> {
        self.notifications()
            .into_iter()
            .map(|n| n.payload)
            .collect()
    }

    pub fn clear(&self) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatusEventSink for MockStatusEventSink {
    fn notify_observers(&self, event_name: &str, event: SyncStatusEvent) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObserverNotification {
                event_name: event_name.to_string(),
                payload: event,
            });
    }
}
