//! Entity tables derived from the entity resolver.
//!
//! Each entity gets one table named after it: the primary key column, one
//! untyped column per attribute and one `<relationship>_id` column per
//! to-one relationship. Flattened relationships get a two-column join
//! table. The column list of every entity is recorded in `entity_registry`
//! so that reopening a database with different metadata fails loudly.

#![allow(clippy::result_large_err)]

use crate::db::quote;
use crate::errors::{from_rusqlite, schema_mismatch, serialization, Result};
use crate::store::Store;
use commitlog_core::metadata::{EntityDescriptor, EntityResolver, JoinTable};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// Ordered column names of an entity table (primary key first)
pub fn entity_columns(entity: &EntityDescriptor) -> Vec<String> {
    let mut columns = vec![entity.pk_column.clone()];
    columns.extend(entity.attribute_names().map(str::to_string));
    columns.extend(entity.to_one_relationships().map(|r| r.fk_column()));
    columns
}

fn create_entity_table(entity: &EntityDescriptor) -> String {
    let mut defs = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT",
        quote(&entity.pk_column)
    )];
    for attribute in &entity.attributes {
        if attribute.mandatory {
            defs.push(format!("{} NOT NULL", quote(&attribute.name)));
        } else {
            defs.push(quote(&attribute.name));
        }
    }
    for relationship in entity.to_one_relationships() {
        defs.push(format!("{} INTEGER", quote(&relationship.fk_column())));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&entity.name),
        defs.join(", ")
    )
}

fn create_join_table(join: &JoinTable) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({src} INTEGER NOT NULL, {dst} INTEGER NOT NULL, PRIMARY KEY ({src}, {dst}))",
        table = quote(&join.name),
        src = quote(&join.source_column),
        dst = quote(&join.target_column),
    )
}

fn check_registry(conn: &Connection, entity: &EntityDescriptor) -> Result<()> {
    let declared = serde_json::to_string(&entity_columns(entity))
        .map_err(|e| serialization("ensure_schema", e))?;

    let stored: Option<String> = conn
        .query_row(
            "SELECT columns FROM entity_registry WHERE entity_name = ?1",
            params![entity.name],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    match stored {
        Some(stored) if stored != declared => {
            Err(schema_mismatch(&entity.name, &stored, &declared))
        }
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "INSERT INTO entity_registry (entity_name, table_name, columns, registered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entity.name,
                    entity.name,
                    declared,
                    chrono::Utc::now().timestamp_millis()
                ],
            )
            .map_err(from_rusqlite)?;
            Ok(())
        }
    }
}

impl Store {
    /// Create missing entity and join tables.
    ///
    /// Idempotent for unchanged metadata.
    ///
    /// # Errors
    ///
    /// `InvalidMetadata` when an entity was registered earlier with a
    /// different column list.
    pub fn ensure_schema(&self, resolver: &EntityResolver) -> Result<()> {
        self.with_conn(|conn| {
            let mut joins: BTreeMap<String, &JoinTable> = BTreeMap::new();
            for entity in resolver.entities() {
                check_registry(conn, entity)?;
                conn.execute_batch(&create_entity_table(entity))
                    .map_err(from_rusqlite)?;
                for relationship in &entity.relationships {
                    if let Some(join) = &relationship.flattened_through {
                        joins.entry(join.name.clone()).or_insert(join);
                    }
                }
            }
            for join in joins.values() {
                conn.execute_batch(&create_join_table(join))
                    .map_err(from_rusqlite)?;
            }
            tracing::debug!(
                entities = resolver.entities().count(),
                join_tables = joins.len(),
                "schema ensured"
            );
            Ok(())
        })
    }
}
