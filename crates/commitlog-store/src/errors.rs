//! Error helpers for commitlog-store
//!
//! All store operations return the core `ExError`.

use commitlog_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Wrap a rusqlite error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Migration failure
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Applied migration whose recorded checksum differs from the embedded SQL
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// Existing entity table created from different metadata
pub fn schema_mismatch(entity: &str, stored: &str, declared: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidMetadata)
        .with_op("ensure_schema")
        .with_entity(entity)
        .with_message(format!(
            "Entity table has columns {} but metadata declares {}",
            stored, declared
        ))
}

/// Lock poisoned by a panicking thread
pub fn poisoned(what: &str) -> ExError {
    ExError::new(ExErrorKind::Concurrency)
        .with_op("lock")
        .with_message(format!("{} lock poisoned", what))
}

/// Object id that cannot address a stored row
pub fn unaddressable(id: &commitlog_core::ObjectId, reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidObjectId)
        .with_entity(id.entity_name())
        .with_object_id(id.to_string())
        .with_message(reason.to_string())
}

pub fn serialization(op: &str, err: serde_json::Error) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op(op)
        .with_message(err.to_string())
}
