//! Database initialization and the resync sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::broadcaster::StatusBroadcaster;
use super::status::SyncStatus;
use super::sync_model::{Change, ReconnectOutcome, ResyncRequest, UnsyncedChangesRequest};
use super::sync_traits::Syncable;
use crate::config::SyncStoreConfig;
use crate::errors::{Error, Result, ValidationError};
use crate::events::StatusEventSink;
use crate::registry::DatabaseRegistry;
use crate::storage::{StorageEngine, StorageHandle, TransactionMode, TransactionScope};

/// Callback declaring the schema and protocols of a database before it opens.
pub type ConfigureFn = Box<dyn FnOnce(&dyn StorageHandle) -> Result<()> + Send>;

/// Serializes resyncs of one `(database, url)` pair.
#[derive(Default)]
struct SessionState {
    lock: Mutex<()>,
    /// Bumped by every successful resync; a reconnect only runs for the
    /// latest one.
    generation: AtomicU64,
}

/// Reconnect scheduled by a resync.
///
/// Dropping it does not cancel the reconnect.
#[derive(Debug)]
pub struct ScheduledReconnect {
    task: JoinHandle<Result<ReconnectOutcome>>,
}

impl ScheduledReconnect {
    /// Waits for the reconnect to run and returns its outcome.
    pub async fn wait(self) -> Result<ReconnectOutcome> {
        self.task
            .await
            .map_err(|e| Error::Unexpected(format!("Reconnect task failed: {}", e)))?
    }
}

pub struct SyncLifecycleManager {
    engine: Arc<dyn StorageEngine>,
    registry: Arc<DatabaseRegistry>,
    broadcaster: StatusBroadcaster,
    config: SyncStoreConfig,
    /// One entry per `(database, url)` pair ever resynced; never evicted.
    sessions: DashMap<(String, String), Arc<SessionState>>,
}

impl SyncLifecycleManager {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        registry: Arc<DatabaseRegistry>,
        sink: Arc<dyn StatusEventSink>,
        config: SyncStoreConfig,
    ) -> Self {
        let broadcaster = StatusBroadcaster::new(sink, config.status_event_name.clone());
        Self {
            engine,
            registry,
            broadcaster,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SyncStoreConfig {
        &self.config
    }

    /// Creates, registers, configures and opens the database `name`.
    ///
    /// In debug mode any existing database with that name is deleted first.
    /// `debug` falls back to the configured default when `None`.
    pub async fn init(
        &self,
        name: &str,
        configure: ConfigureFn,
        debug: Option<bool>,
    ) -> Result<Arc<dyn StorageHandle>> {
        let debug = debug.unwrap_or(self.config.debug);
        if debug {
            warn!(
                "Database '{}' is initialized in debug mode; its data will be deleted",
                name
            );
        }

        let handle = self.engine.create_handle(name)?;
        self.registry.register(name, handle.clone())?;

        handle.on_blocked(Arc::new(|db: &str| {
            warn!("Database '{}' is blocked by another open connection", db);
        }));
        self.broadcaster.attach(handle.syncable().as_ref());

        if debug {
            match handle.delete().await {
                Ok(()) => warn!("Database '{}' deleted (debug mode)", name),
                Err(e) => warn!("Could not delete database '{}' in debug mode: {}", name, e),
            }
        }

        configure(handle.as_ref())?;
        handle.open().await?;
        info!("Database '{}' opened", name);
        Ok(handle)
    }

    fn session(&self, db_name: &str, url: &str) -> Arc<SessionState> {
        self.sessions
            .entry((db_name.to_string(), url.to_string()))
            .or_default()
            .clone()
    }

    /// Disconnects from `url`, clears the named tables in one transaction,
    /// drops the local sync state and schedules a reconnect.
    ///
    /// Any failure stops the sequence where it happened and nothing is
    /// scheduled.
    pub async fn resync(&self, request: ResyncRequest) -> Result<ScheduledReconnect> {
        let ResyncRequest {
            db_name,
            store_names,
            url,
        } = request;
        let store_names = store_names.into_vec();
        if store_names.is_empty() {
            return Err(ValidationError::MissingField("storeNames".to_string()).into());
        }

        let handle = self.registry.require(&db_name)?;
        let syncable = handle.syncable();
        let session = self.session(&db_name, &url);

        let generation = {
            let _guard = session.lock.lock().await;
            info!(
                "Resyncing {:?} of '{}' with {}",
                store_names, db_name, url
            );

            syncable.disconnect(&url).await?;
            debug!("[{}] disconnected from {}", db_name, url);

            let tables = store_names
                .iter()
                .map(|name| handle.table(name).map(|t| t.name().to_string()))
                .collect::<Result<Vec<_>>>()?;

            let cleared = tables.clone();
            handle
                .transaction(
                    TransactionMode::ReadWrite,
                    &tables,
                    Box::new(move |scope: &mut dyn TransactionScope| {
                        for table in &cleared {
                            scope.clear(table)?;
                        }
                        Ok(())
                    }),
                )
                .await?;
            debug!("[{}] cleared {:?}", db_name, tables);

            syncable.delete(&url).await?;
            debug!("[{}] deleted sync state for {}", db_name, url);

            // Only a completed resync takes over a pending reconnect.
            session.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let task = tokio::spawn(reconnect(
            session,
            generation,
            syncable,
            self.config.protocol_name.clone(),
            db_name,
            url,
            self.config.reconnect_delay,
        ));
        Ok(ScheduledReconnect { task })
    }

    /// Changes `url` has not acknowledged yet.
    ///
    /// `None` when the database is not registered or not open.
    pub async fn unsynced_changes(
        &self,
        request: UnsyncedChangesRequest,
    ) -> Result<Option<Vec<Change>>> {
        let Some(handle) = self.registry.resolve(&request.db_name) else {
            debug!("unsynced_changes: '{}' is not registered", request.db_name);
            return Ok(None);
        };
        if !handle.is_open() {
            debug!("unsynced_changes: '{}' is not open", request.db_name);
            return Ok(None);
        }

        let changes = handle.syncable().unsynced_changes(&request.url).await?;
        Ok(Some(changes))
    }

    /// Last status reported for `url` on `db_name`.
    pub fn status(&self, db_name: &str, url: &str) -> Option<SyncStatus> {
        self.registry.resolve(db_name)?.syncable().status(url)
    }
}

async fn reconnect(
    session: Arc<SessionState>,
    generation: u64,
    syncable: Arc<dyn Syncable>,
    protocol: String,
    db_name: String,
    url: String,
    delay: std::time::Duration,
) -> Result<ReconnectOutcome> {
    tokio::time::sleep(delay).await;

    let _guard = session.lock.lock().await;
    if session.generation.load(Ordering::SeqCst) != generation {
        warn!(
            "[{}] reconnect to {} skipped: a newer resync took over",
            db_name, url
        );
        return Ok(ReconnectOutcome::Superseded);
    }

    match syncable.connect(&protocol, &url).await {
        Ok(()) => {
            info!("[{}] reconnected to {} after resync", db_name, url);
            Ok(ReconnectOutcome::Connected)
        }
        Err(e) => {
            error!("[{}] reconnect to {} failed: {}", db_name, url, e);
            Err(e)
        }
    }
}
