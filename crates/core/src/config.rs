//! Runtime configuration for the storage facade.

use std::time::Duration;

use crate::constants::{DEFAULT_RECONNECT_DELAY_MS, DEFAULT_SYNC_PROTOCOL, STATUS_CHANGED_EVENT};
use crate::errors::{Error, Result};

const ENV_RECONNECT_DELAY_MS: &str = "TABLESYNC_RECONNECT_DELAY_MS";
const ENV_PROTOCOL: &str = "TABLESYNC_PROTOCOL";
const ENV_STATUS_EVENT: &str = "TABLESYNC_STATUS_EVENT";
const ENV_DEBUG: &str = "TABLESYNC_DEBUG";

/// Settings shared by the lifecycle manager and the status broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStoreConfig {
    /// How long a resync waits before reconnecting.
    pub reconnect_delay: Duration,
    /// Protocol name passed to `connect` by the scheduled reconnect.
    pub protocol_name: String,
    /// Event name handed to observers with every status transition.
    pub status_event_name: String,
    /// Default debug flag for `init` when the caller does not pass one.
    pub debug: bool,
}

impl Default for SyncStoreConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            protocol_name: DEFAULT_SYNC_PROTOCOL.to_string(),
            status_event_name: STATUS_CHANGED_EVENT.to_string(),
            debug: false,
        }
    }
}

impl SyncStoreConfig {
    /// Builds a config from `TABLESYNC_*` environment variables, falling back
    /// to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RECONNECT_DELAY_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|_| {
                Error::InvalidConfigValue(format!("{}={}", ENV_RECONNECT_DELAY_MS, raw))
            })?;
            config.reconnect_delay = Duration::from_millis(millis);
        }

        if let Some(protocol) = lookup(ENV_PROTOCOL) {
            if protocol.trim().is_empty() {
                return Err(Error::InvalidConfigValue(format!(
                    "{} must not be empty",
                    ENV_PROTOCOL
                )));
            }
            config.protocol_name = protocol.trim().to_string();
        }

        if let Some(event_name) = lookup(ENV_STATUS_EVENT) {
            if !event_name.trim().is_empty() {
                config.status_event_name = event_name.trim().to_string();
            }
        }

        if let Some(raw) = lookup(ENV_DEBUG) {
            config.debug = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(Error::InvalidConfigValue(format!("{}={}", ENV_DEBUG, raw)));
                }
            };
        }

        Ok(config)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_protocol(mut self, protocol_name: impl Into<String>) -> Self {
        self.protocol_name = protocol_name.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
