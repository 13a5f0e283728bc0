//! Request types of the CRUD facade.

use serde::{Deserialize, Serialize};

use crate::records::{Key, Record};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub db_name: String,
    pub store_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRequest {
    pub db_name: String,
    pub store_name: String,
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetByIndexRequest {
    pub db_name: String,
    pub store_name: String,
    pub index: String,
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRequest {
    pub db_name: String,
    pub store_name: String,
    pub value: Record,
}

impl ListRequest {
    pub fn new(db_name: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            store_name: store_name.into(),
        }
    }
}

impl GetRequest {
    pub fn new(
        db_name: impl Into<String>,
        store_name: impl Into<String>,
        key: impl Into<Key>,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            store_name: store_name.into(),
            key: key.into(),
        }
    }
}

impl GetByIndexRequest {
    pub fn new(
        db_name: impl Into<String>,
        store_name: impl Into<String>,
        index: impl Into<String>,
        key: impl Into<Key>,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            store_name: store_name.into(),
            index: index.into(),
            key: key.into(),
        }
    }
}

impl PutRequest {
    pub fn new(db_name: impl Into<String>, store_name: impl Into<String>, value: Record) -> Self {
        Self {
            db_name: db_name.into(),
            store_name: store_name.into(),
            value,
        }
    }
}
