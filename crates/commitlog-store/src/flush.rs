//! Writing one commit's worth of row and join-table operations.

#![allow(clippy::result_large_err)]

use crate::db::quote;
use crate::errors::{from_rusqlite, unaddressable, Result};
use crate::rows::pk_of;
use crate::store::Store;
use crate::values::to_sql;
use commitlog_core::metadata::{EntityResolver, JoinTable};
use commitlog_core::{ExError, IdMap, ObjectId};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::collections::BTreeMap;

/// Full column state of one inserted or updated row
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    pub id: ObjectId,
    pub attributes: BTreeMap<String, Value>,
    /// Keyed by relationship name
    pub to_one: BTreeMap<String, Option<ObjectId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRow {
    pub join: JoinTable,
    pub source: ObjectId,
    pub target: ObjectId,
}

/// A row taking a caller-chosen primary key. `from` is temporary for a
/// row inserted with a supplied key and permanent for a stored row moving
/// to a new key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChange {
    pub from: ObjectId,
    pub to: ObjectId,
}

#[derive(Debug, Clone, Default)]
pub struct FlushBatch {
    pub key_changes: Vec<KeyChange>,
    pub inserts: Vec<RowWrite>,
    pub updates: Vec<RowWrite>,
    pub deletes: Vec<ObjectId>,
    pub join_deletes: Vec<JoinRow>,
    pub join_inserts: Vec<JoinRow>,
}

impl FlushBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.key_changes.is_empty()
            && self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.join_deletes.is_empty()
            && self.join_inserts.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.key_changes.len()
            + self.inserts.len()
            + self.updates.len()
            + self.deletes.len()
            + self.join_deletes.len()
            + self.join_inserts.len()
    }
}

fn permanent_pk(resolver: &EntityResolver, id_map: &IdMap, id: &ObjectId) -> Result<i64> {
    let resolved = id_map.resolve(id);
    if resolved.is_temporary() {
        return Err(unaddressable(id, "temporary id was not assigned a key"));
    }
    pk_of(resolver, &resolved)
}

fn insert_row(
    conn: &Connection,
    resolver: &EntityResolver,
    row: &RowWrite,
    supplied: Option<&ObjectId>,
) -> Result<ObjectId> {
    let entity = resolver.entity(row.id.entity_name()).map_err(ExError::from)?;
    let mut columns = Vec::new();
    let mut values = Vec::new();
    let explicit = supplied.or((!row.id.is_temporary()).then_some(&row.id));
    if let Some(key) = explicit {
        columns.push(quote(&entity.pk_column));
        values.push(SqlValue::Integer(pk_of(resolver, key)?));
    }
    for (name, value) in &row.attributes {
        columns.push(quote(name));
        values.push(to_sql(value));
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote(&entity.name))
    } else {
        let placeholders = (1..=values.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&entity.name),
            columns.join(", "),
            placeholders
        )
    };
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| from_rusqlite(e).with_entity(&entity.name))?;

    Ok(ObjectId::of(
        &entity.name,
        &entity.pk_column,
        conn.last_insert_rowid(),
    ))
}

fn update_row(
    conn: &Connection,
    resolver: &EntityResolver,
    id_map: &IdMap,
    row: &RowWrite,
    include_attributes: bool,
) -> Result<()> {
    let entity = resolver.entity(row.id.entity_name()).map_err(ExError::from)?;
    let mut assignments = Vec::new();
    let mut values = Vec::new();

    if include_attributes {
        for (name, value) in &row.attributes {
            values.push(to_sql(value));
            assignments.push(format!("{} = ?{}", quote(name), values.len()));
        }
    }
    for (name, target) in &row.to_one {
        let relationship = entity.require_relationship(name).map_err(ExError::from)?;
        let value = match target {
            Some(target) => SqlValue::Integer(permanent_pk(resolver, id_map, target)?),
            None => SqlValue::Null,
        };
        values.push(value);
        assignments.push(format!(
            "{} = ?{}",
            quote(&relationship.fk_column()),
            values.len()
        ));
    }
    if assignments.is_empty() {
        return Ok(());
    }

    values.push(SqlValue::Integer(permanent_pk(resolver, id_map, &row.id)?));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(&entity.name),
        assignments.join(", "),
        quote(&entity.pk_column),
        values.len()
    );
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| from_rusqlite(e).with_entity(&entity.name))?;
    Ok(())
}

fn write_join(
    conn: &Connection,
    resolver: &EntityResolver,
    id_map: &IdMap,
    row: &JoinRow,
    insert: bool,
) -> Result<()> {
    let source = permanent_pk(resolver, id_map, &row.source)?;
    let target = permanent_pk(resolver, id_map, &row.target)?;
    let sql = if insert {
        format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
            quote(&row.join.name),
            quote(&row.join.source_column),
            quote(&row.join.target_column)
        )
    } else {
        format!(
            "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
            quote(&row.join.name),
            quote(&row.join.source_column),
            quote(&row.join.target_column)
        )
    };
    conn.execute(&sql, [source, target]).map_err(from_rusqlite)?;
    Ok(())
}

/// Move a stored row to a new key. Foreign key columns and join rows that
/// point at the old key follow it.
fn move_key(conn: &Connection, resolver: &EntityResolver, change: &KeyChange) -> Result<()> {
    let entity = resolver
        .entity(change.from.entity_name())
        .map_err(ExError::from)?;
    let old = pk_of(resolver, &change.from)?;
    let new = pk_of(resolver, &change.to)?;

    let sql = format!(
        "UPDATE {} SET {pk} = ?1 WHERE {pk} = ?2",
        quote(&entity.name),
        pk = quote(&entity.pk_column)
    );
    let moved = conn
        .execute(&sql, [new, old])
        .map_err(|e| from_rusqlite(e).with_entity(&entity.name))?;
    if moved == 0 {
        return Err(unaddressable(&change.from, "no stored row to re-key"));
    }

    for owner in resolver.entities() {
        for relationship in &owner.relationships {
            let mut columns = Vec::new();
            match &relationship.flattened_through {
                Some(join) => {
                    if owner.name == entity.name {
                        columns.push((join.name.clone(), join.source_column.clone()));
                    }
                    if relationship.target_entity == entity.name {
                        columns.push((join.name.clone(), join.target_column.clone()));
                    }
                }
                None if !relationship.is_to_many() && relationship.target_entity == entity.name => {
                    columns.push((owner.name.clone(), relationship.fk_column()));
                }
                None => {}
            }
            for (table, column) in columns {
                let sql = format!(
                    "UPDATE {} SET {col} = ?1 WHERE {col} = ?2",
                    quote(&table),
                    col = quote(&column)
                );
                conn.execute(&sql, [new, old]).map_err(from_rusqlite)?;
            }
        }
    }
    tracing::debug!(entity = entity.name.as_str(), old, new, "row re-keyed");
    Ok(())
}

fn delete_row(conn: &Connection, resolver: &EntityResolver, id: &ObjectId) -> Result<()> {
    let entity = resolver.entity(id.entity_name()).map_err(ExError::from)?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote(&entity.name),
        quote(&entity.pk_column)
    );
    conn.execute(&sql, [pk_of(resolver, id)?])
        .map_err(from_rusqlite)?;
    Ok(())
}

impl Store {
    /// Apply a batch and return the temporary-to-permanent id mapping of
    /// the inserted rows.
    ///
    /// Order: key moves, inserts, foreign keys and updates, join deletes,
    /// join inserts, row deletes. Rows written after a key move address
    /// the moved row by its new key. Callers run this inside a transaction
    /// scope; on error the scope rolls the partial batch back.
    ///
    /// # Errors
    ///
    /// `Persistence` for constraint violations, `InvalidObjectId` for ids
    /// that cannot be mapped to a row.
    pub fn flush(&self, resolver: &EntityResolver, batch: &FlushBatch) -> Result<IdMap> {
        self.with_conn(|conn| {
            let mut id_map = IdMap::new();
            let mut supplied = IdMap::new();
            // every id the rows of this batch may reference, moved keys included
            let mut resolution = IdMap::new();
            for change in &batch.key_changes {
                if change.from.is_temporary() {
                    supplied.insert(change.from.clone(), change.to.clone());
                } else {
                    move_key(conn, resolver, change)?;
                    resolution.insert(change.from.clone(), change.to.clone());
                }
            }
            for row in &batch.inserts {
                let permanent = insert_row(conn, resolver, row, supplied.get(&row.id))?;
                if row.id.is_temporary() {
                    id_map.insert(row.id.clone(), permanent.clone());
                    resolution.insert(row.id.clone(), permanent);
                }
            }
            for row in &batch.inserts {
                update_row(conn, resolver, &resolution, row, false)?;
            }
            for row in &batch.updates {
                update_row(conn, resolver, &resolution, row, true)?;
            }
            for row in &batch.join_deletes {
                write_join(conn, resolver, &resolution, row, false)?;
            }
            for row in &batch.join_inserts {
                write_join(conn, resolver, &resolution, row, true)?;
            }
            for id in &batch.deletes {
                delete_row(conn, resolver, &resolution.resolve(id))?;
            }
            tracing::debug!(
                operations = batch.operation_count(),
                generated_keys = id_map.len(),
                "batch flushed"
            );
            Ok(id_map)
        })
    }
}
