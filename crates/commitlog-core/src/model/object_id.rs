//! Persistent object identity.
//!
//! An [`ObjectId`] is an entity name plus either a temporary key (assigned
//! when an object is created in memory) or a permanent primary key snapshot
//! (column name → value). Ordering is total so ids can live in `BTreeSet`s.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One primary key column value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl KeyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            KeyValue::Text(_) => None,
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Key part of an [`ObjectId`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKey {
    /// Client-side key of an object not yet inserted
    Temporary(Uuid),
    /// Primary key snapshot of a stored row
    Permanent(BTreeMap<String, KeyValue>),
}

/// Identity of one persistent object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    entity_name: String,
    key: IdKey,
}

impl ObjectId {
    /// Permanent id with a single key column
    pub fn of(entity_name: &str, column: &str, value: impl Into<KeyValue>) -> Self {
        let mut key = BTreeMap::new();
        key.insert(column.to_string(), value.into());
        Self {
            entity_name: entity_name.to_string(),
            key: IdKey::Permanent(key),
        }
    }

    /// Permanent id with a compound key
    pub fn of_map(entity_name: &str, key: BTreeMap<String, KeyValue>) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            key: IdKey::Permanent(key),
        }
    }

    /// Fresh temporary id
    pub fn temporary(entity_name: &str) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            key: IdKey::Temporary(Uuid::new_v4()),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn key(&self) -> &IdKey {
        &self.key
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.key, IdKey::Temporary(_))
    }

    /// Primary key snapshot, `None` for temporary ids
    pub fn id_snapshot(&self) -> Option<&BTreeMap<String, KeyValue>> {
        match &self.key {
            IdKey::Permanent(map) => Some(map),
            IdKey::Temporary(_) => None,
        }
    }

    /// Value of one key column, `None` for temporary ids or unknown columns
    pub fn key_value(&self, column: &str) -> Option<&KeyValue> {
        self.id_snapshot().and_then(|map| map.get(column))
    }

    /// The single value of a one-column permanent key
    pub fn single_key_value(&self) -> Option<&KeyValue> {
        match self.id_snapshot() {
            Some(map) if map.len() == 1 => map.values().next(),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ObjectId:{}", self.entity_name)?;
        match &self.key {
            IdKey::Temporary(uuid) => write!(f, ", TEMP:{}", uuid)?,
            IdKey::Permanent(map) => {
                for (column, value) in map {
                    write!(f, ", {}={}", column, value)?;
                }
            }
        }
        write!(f, ">")
    }
}
