//! SQL access to user tables.
//!
//! Every declared store maps to a table `"s_<name>"` holding the JSON-encoded
//! key, the key as an integer when it is one (for auto-increment), and the
//! JSON-encoded record. Store names are validated identifiers, so they can be
//! spliced into statements.

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::SqliteConnection;

use crate::errors::StorageError;
use crate::models::{encode_key, MaxKeyDB, RecordRowDB};
use tablesync_core::records::{Key, Record};

fn table_sql(table: &str) -> String {
    format!("\"s_{}\"", table)
}

pub fn create_table(conn: &mut SqliteConnection, table: &str) -> Result<(), StorageError> {
    sql_query(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            key TEXT NOT NULL PRIMARY KEY,
            key_int INTEGER,
            value TEXT NOT NULL
        )",
        table_sql(table)
    ))
    .execute(conn)?;
    Ok(())
}

/// Every row of `table`, in key order.
pub fn load_rows(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<(Key, Record)>, StorageError> {
    let rows: Vec<RecordRowDB> =
        sql_query(format!("SELECT key, value FROM {}", table_sql(table))).load(conn)?;

    let mut decoded = rows
        .into_iter()
        .map(RecordRowDB::decode)
        .collect::<Result<Vec<_>, _>>()?;
    decoded.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(decoded)
}

pub fn load_row(
    conn: &mut SqliteConnection,
    table: &str,
    key: &Key,
) -> Result<Option<Record>, StorageError> {
    let rows: Vec<RecordRowDB> = sql_query(format!(
        "SELECT key, value FROM {} WHERE key = ?",
        table_sql(table)
    ))
    .bind::<Text, _>(encode_key(key)?)
    .load(conn)?;

    rows.into_iter()
        .next()
        .map(|row| row.decode().map(|(_, record)| record))
        .transpose()
}

pub fn write_row(
    conn: &mut SqliteConnection,
    table: &str,
    key: &Key,
    record: &Record,
) -> Result<(), StorageError> {
    sql_query(format!(
        "INSERT OR REPLACE INTO {} (key, key_int, value) VALUES (?, ?, ?)",
        table_sql(table)
    ))
    .bind::<Text, _>(encode_key(key)?)
    .bind::<Nullable<BigInt>, _>(key.as_int())
    .bind::<Text, _>(serde_json::to_string(record)?)
    .execute(conn)?;
    Ok(())
}

pub fn delete_row(conn: &mut SqliteConnection, table: &str, key: &Key) -> Result<(), StorageError> {
    sql_query(format!("DELETE FROM {} WHERE key = ?", table_sql(table)))
        .bind::<Text, _>(encode_key(key)?)
        .execute(conn)?;
    Ok(())
}

/// Deletes every row and returns the keys that were removed, in key order.
pub fn clear_rows(conn: &mut SqliteConnection, table: &str) -> Result<Vec<Key>, StorageError> {
    let keys = load_rows(conn, table)?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    sql_query(format!("DELETE FROM {}", table_sql(table))).execute(conn)?;
    Ok(keys)
}

pub fn max_int_key(conn: &mut SqliteConnection, table: &str) -> Result<Option<i64>, StorageError> {
    let row: MaxKeyDB = sql_query(format!(
        "SELECT MAX(key_int) AS max_key FROM {}",
        table_sql(table)
    ))
    .get_result(conn)?;
    Ok(row.max_key)
}
