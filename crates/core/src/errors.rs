//! Core error types for tablesync.
//!
//! This module defines engine-agnostic error types. Engine-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the storage facade.
///
/// Engine-specific errors are wrapped in string form to keep this type
/// independent of any particular storage backend.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Synchronization failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database '{0}' is not registered")]
    DatabaseNotFound(String),

    #[error("Database '{0}' is already registered")]
    DuplicateDatabase(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Engine-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert engine-specific errors into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The handle has not been opened (or was deleted).
    #[error("Database '{0}' is not open")]
    NotOpen(String),

    /// The table was not declared in the database schema.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The index was not declared on the table.
    #[error("Index '{index}' not found on table '{table}'")]
    IndexNotFound { table: String, index: String },

    /// A unique index already holds the value.
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A transaction failed and was rolled back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// The declared schema could not be parsed or applied.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Deleting the database from disk failed.
    #[error("Failed to delete database: {0}")]
    DeleteFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Errors raised by the synchronization sub-object.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync protocol '{0}' is not registered")]
    ProtocolNotRegistered(String),

    #[error("Sync protocol failed for {url}: {message}")]
    Protocol { url: String, message: String },
}

impl SyncError {
    pub fn protocol(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Validation errors for caller input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

// === From implementations for common error types ===

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(ValidationError::InvalidInput(err.to_string()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Database(DatabaseError::Internal(err.to_string()))
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
