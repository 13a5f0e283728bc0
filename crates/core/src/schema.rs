//! Table and index declarations.
//!
//! Stores are declared with the compact syntax used by browser-side
//! key/value stores: a comma-separated list whose first entry is the primary
//! key path, followed by secondary indexes.
//!
//! ```text
//! "++id,customer,&reference,*tags"
//!  │    │        │          └ multi-entry index (array field, matches any element)
//!  │    │        └ unique index
//!  │    └ plain index
//!  └ auto-incrementing primary key
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::{DatabaseError, Result, ValidationError};
use crate::records::{Key, Record};

/// A secondary index (or the primary key viewed as an index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Key path of the indexed field; dotted paths reach into nested objects.
    pub key_path: String,
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexSpec {
    /// All keys this record contributes to the index.
    pub fn keys_of(&self, record: &Record) -> Vec<Key> {
        match resolve_path(record, &self.key_path) {
            Some(Value::Array(items)) if self.multi_entry => {
                items.iter().filter_map(Key::from_value).collect()
            }
            Some(value) => Key::from_value(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn matches(&self, record: &Record, key: &Key) -> bool {
        self.keys_of(record).iter().any(|k| k == key)
    }
}

/// Declaration of a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    pub name: String,
    pub key_path: String,
    pub auto_increment: bool,
    pub indexes: Vec<IndexSpec>,
}

impl StoreSchema {
    pub fn parse(name: &str, spec: &str) -> Result<Self> {
        validate_identifier(name, false)?;

        let mut parts = spec.split(',').map(str::trim);
        let primary = parts.next().unwrap_or_default();

        let (auto_increment, key_path) = match primary.strip_prefix("++") {
            Some(path) => (true, path),
            None => (false, primary),
        };
        if key_path.is_empty() {
            return Err(DatabaseError::InvalidSchema(format!(
                "store '{}' must declare an inbound primary key path",
                name
            ))
            .into());
        }
        if key_path.starts_with('[') || key_path.starts_with('&') || key_path.starts_with('*') {
            return Err(DatabaseError::InvalidSchema(format!(
                "store '{}' has an unsupported primary key '{}'",
                name, primary
            ))
            .into());
        }
        if auto_increment && key_path.contains('.') {
            return Err(DatabaseError::InvalidSchema(format!(
                "store '{}': auto-increment keys cannot use nested paths",
                name
            ))
            .into());
        }
        validate_identifier(key_path, true)?;

        let mut indexes: Vec<IndexSpec> = Vec::new();
        for part in parts.filter(|p| !p.is_empty()) {
            let (unique, multi_entry, path) = if let Some(path) = part.strip_prefix('&') {
                (true, false, path)
            } else if let Some(path) = part.strip_prefix('*') {
                (false, true, path)
            } else {
                (false, false, part)
            };

            if path.starts_with('[') {
                return Err(DatabaseError::InvalidSchema(format!(
                    "store '{}': compound index '{}' is not supported",
                    name, part
                ))
                .into());
            }
            validate_identifier(path, true)?;

            if path == key_path || indexes.iter().any(|i| i.key_path == path) {
                return Err(DatabaseError::InvalidSchema(format!(
                    "store '{}' declares '{}' twice",
                    name, path
                ))
                .into());
            }

            indexes.push(IndexSpec {
                key_path: path.to_string(),
                unique,
                multi_entry,
            });
        }

        Ok(Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            auto_increment,
            indexes,
        })
    }

    /// Looks up a queryable index. The primary key path always qualifies.
    pub fn index(&self, name: &str) -> Result<IndexSpec> {
        if name == self.key_path {
            return Ok(IndexSpec {
                key_path: self.key_path.clone(),
                unique: true,
                multi_entry: false,
            });
        }
        self.indexes
            .iter()
            .find(|i| i.key_path == name)
            .cloned()
            .ok_or_else(|| {
                DatabaseError::IndexNotFound {
                    table: self.name.clone(),
                    index: name.to_string(),
                }
                .into()
            })
    }

    /// Reads the primary key from a record. A missing or null field is `None`.
    pub fn primary_key_of(&self, record: &Record) -> Result<Option<Key>> {
        match resolve_path(record, &self.key_path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Key::from_value(value).map(Some).ok_or_else(|| {
                ValidationError::InvalidKey(format!(
                    "'{}' on table '{}' must be an integer or a string",
                    self.key_path, self.name
                ))
                .into()
            }),
        }
    }

    /// Resolves the key a put will store the record under, generating one for
    /// auto-increment stores and writing it back into the record.
    pub fn prepare_put<F>(&self, record: &mut Record, next_auto_key: F) -> Result<Key>
    where
        F: FnOnce() -> Result<i64>,
    {
        if let Some(key) = self.primary_key_of(record)? {
            return Ok(key);
        }
        if !self.auto_increment {
            return Err(ValidationError::MissingField(self.key_path.clone()).into());
        }

        let key = next_auto_key()?;
        if let Value::Object(map) = record {
            map.insert(self.key_path.clone(), Value::from(key));
        }
        Ok(Key::Int(key))
    }

    /// Fails when a unique index value of `record` is already held by another
    /// record in `existing`.
    pub fn check_unique<'a, I>(&self, key: &Key, record: &Record, existing: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Key, &'a Record)>,
    {
        let unique: Vec<(&IndexSpec, Vec<Key>)> = self
            .indexes
            .iter()
            .filter(|i| i.unique)
            .map(|i| (i, i.keys_of(record)))
            .filter(|(_, keys)| !keys.is_empty())
            .collect();
        if unique.is_empty() {
            return Ok(());
        }

        for (other_key, other) in existing {
            if other_key == key {
                continue;
            }
            for (index, keys) in &unique {
                if index.keys_of(other).iter().any(|k| keys.contains(k)) {
                    return Err(DatabaseError::UniqueViolation(format!(
                        "{}.{}",
                        self.name, index.key_path
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// The set of tables a database declares before it is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    stores: BTreeMap<String, StoreSchema>,
}

impl DatabaseSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store declaration, e.g. `.store("orders", "++id,customer")?`.
    pub fn store(mut self, name: &str, spec: &str) -> Result<Self> {
        let store = StoreSchema::parse(name, spec)?;
        if self.stores.insert(name.to_string(), store).is_some() {
            return Err(
                DatabaseError::InvalidSchema(format!("store '{}' declared twice", name)).into(),
            );
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.get(name)
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreSchema> {
        self.stores.values()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Auto-increment key following `highest`, the largest integer key stored.
pub fn next_auto_key(highest: Option<i64>) -> Result<i64> {
    highest.unwrap_or(0).checked_add(1).ok_or_else(|| {
        ValidationError::InvalidKey("auto-increment keys are exhausted".to_string()).into()
    })
}

fn resolve_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

fn validate_identifier(name: &str, allow_dots: bool) -> Result<()> {
    let valid = name.split('.').enumerate().all(|(i, segment)| {
        (allow_dots || i == 0)
            && segment
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    });

    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidSchema(format!("invalid name '{}'", name)).into())
    }
}
