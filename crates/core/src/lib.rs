//! Tablesync Core - Storage facade, CRUD operations and the sync lifecycle.
//!
//! This crate contains the engine-agnostic part of tablesync: the storage
//! and synchronization traits, the database registry, the CRUD facade, the
//! lifecycle manager driving init and resync, and an in-memory engine.
//! The persistent engine lives in the `storage-sqlite` crate.

pub mod config;
pub mod constants;
pub mod crud;
pub mod errors;
pub mod events;
pub mod records;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::SyncStoreConfig;
pub use records::{Key, Record};
pub use schema::DatabaseSchema;
pub use store::SyncStore;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
