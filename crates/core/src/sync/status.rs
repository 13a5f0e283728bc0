//! Synchronization status codes and their display texts.

use serde::{Deserialize, Serialize};

/// Text reported for codes outside the status table.
pub const UNKNOWN_STATUS_TEXT: &str = "UNKNOWN";

/// Status of the synchronization with one remote URL.
///
/// Codes follow the wire values used by browser-side sync add-ons, so
/// anything the protocol reports can round-trip through `code()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Error,
    Offline,
    Connecting,
    Online,
    Syncing,
    ErrorWillRetry,
    /// A code the status table does not know.
    Other(i32),
}

impl SyncStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => SyncStatus::Error,
            0 => SyncStatus::Offline,
            1 => SyncStatus::Connecting,
            2 => SyncStatus::Online,
            3 => SyncStatus::Syncing,
            4 => SyncStatus::ErrorWillRetry,
            other => SyncStatus::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            SyncStatus::Error => -1,
            SyncStatus::Offline => 0,
            SyncStatus::Connecting => 1,
            SyncStatus::Online => 2,
            SyncStatus::Syncing => 3,
            SyncStatus::ErrorWillRetry => 4,
            SyncStatus::Other(code) => *code,
        }
    }

    /// Human-readable text; never fails, unknown codes get a fallback.
    pub fn text(&self) -> &'static str {
        match self {
            SyncStatus::Error => "ERROR",
            SyncStatus::Offline => "OFFLINE",
            SyncStatus::Connecting => "CONNECTING",
            SyncStatus::Online => "ONLINE",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::ErrorWillRetry => "ERROR_WILL_RETRY",
            SyncStatus::Other(_) => UNKNOWN_STATUS_TEXT,
        }
    }
}

/// Looks up the display text for a raw status code.
pub fn status_text(code: i32) -> &'static str {
    SyncStatus::from_code(code).text()
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.text(), self.code())
    }
}

impl Serialize for SyncStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for SyncStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(SyncStatus::from_code)
    }
}
