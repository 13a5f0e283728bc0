/// Protocol used when a resync schedules its reconnect
pub const DEFAULT_SYNC_PROTOCOL: &str = "iSyncRestProtocol";

/// Delay between a successful resync and the reconnect, in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1500;

/// Event name used when broadcasting status transitions to observers
pub const STATUS_CHANGED_EVENT: &str = "syncStatusChanged";

/// Bookkeeping field added by list-rendering UI frameworks; never persisted
pub const TRANSIENT_UI_KEY: &str = "$$hashKey";
