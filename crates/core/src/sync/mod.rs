//! Synchronization lifecycle: status codes, the sync sub-object, the status
//! broadcaster and the lifecycle manager driving init and resync.

mod broadcaster;
mod controller;
mod lifecycle;
mod status;
mod sync_model;
mod sync_traits;

pub use broadcaster::StatusBroadcaster;
pub use controller::SyncController;
pub use lifecycle::{ConfigureFn, ScheduledReconnect, SyncLifecycleManager};
pub use status::{status_text, SyncStatus, UNKNOWN_STATUS_TEXT};
pub use sync_model::*;
pub use sync_traits::{StatusListener, SyncNodeStore, SyncProtocol, Syncable};

#[cfg(test)]
mod tests;
