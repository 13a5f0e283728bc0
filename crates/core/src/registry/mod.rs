//! Name to handle registry of the databases this process opened.

use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::errors::{Error, Result};
use crate::storage::StorageHandle;

/// A registered database.
#[derive(Clone)]
pub struct DatabaseEntry {
    pub name: String,
    pub handle: Arc<dyn StorageHandle>,
}

impl std::fmt::Debug for DatabaseEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseEntry")
            .field("name", &self.name)
            .field("open", &self.handle.is_open())
            .finish()
    }
}

/// Registered databases in registration order. Names are unique.
#[derive(Default)]
pub struct DatabaseRegistry {
    entries: RwLock<Vec<DatabaseEntry>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handle: Arc<dyn StorageHandle>) -> Result<DatabaseEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| e.name == name) {
            return Err(Error::DuplicateDatabase(name.to_string()));
        }

        let entry = DatabaseEntry {
            name: name.to_string(),
            handle,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Looks a handle up by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn StorageHandle>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        debug!(
            "Resolving '{}' among {:?}",
            name,
            entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
        );
        entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.handle.clone())
    }

    /// Like `resolve`, failing with `DatabaseNotFound`.
    pub fn require(&self, name: &str) -> Result<Arc<dyn StorageHandle>> {
        self.resolve(name)
            .ok_or_else(|| Error::DatabaseNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
