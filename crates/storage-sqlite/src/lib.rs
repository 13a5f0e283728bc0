//! SQLite storage engine for tablesync.
//!
//! This crate implements the storage traits defined in `tablesync-core` on
//! top of Diesel and SQLite:
//! - one database file per database name, with WAL and pooled readers
//! - a single writer actor per database running every write transaction
//! - embedded migrations for the sync node and change log tables
//! - user tables created at open time from the declared schema
//!
//! # Architecture
//!
//! This crate is the only place where Diesel dependencies exist. The core
//! crate is engine-agnostic and works with traits.
//!
//! ```text
//!        tablesync-core (facade, lifecycle)
//!                  │
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │
//!                  ▼
//!         <data_dir>/<name>.db
//! ```

pub mod db;
pub mod errors;
pub mod models;
pub mod schema;

mod engine;
mod rows;
mod sync_store;
mod table;

pub use engine::{SqliteEngine, SqliteHandle};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

// Re-export from tablesync-core for convenience
pub use tablesync_core::errors::{DatabaseError, Error, Result};

#[cfg(test)]
mod tests;
