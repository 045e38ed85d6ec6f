//! Reading committed rows back as object snapshots.

#![allow(clippy::result_large_err)]

use crate::db::quote;
use crate::errors::{from_rusqlite, unaddressable, Result};
use crate::store::Store;
use crate::values::{from_sql, to_sql};
use commitlog_core::metadata::{EntityDescriptor, EntityResolver, JoinTable};
use commitlog_core::{ExError, ObjectId, Snapshot};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::collections::BTreeMap;

/// One committed entity row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: ObjectId,
    pub attributes: BTreeMap<String, Value>,
    pub to_one: BTreeMap<String, Option<ObjectId>>,
}

impl Row {
    /// Snapshot with attributes and to-one targets; to-many members are
    /// not part of a row
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            attributes: self.attributes,
            to_one: self.to_one,
            to_many: BTreeMap::new(),
        }
    }
}

/// Integer primary key of a permanent id
pub(crate) fn pk_of(resolver: &EntityResolver, id: &ObjectId) -> Result<i64> {
    let entity = resolver.entity(id.entity_name()).map_err(ExError::from)?;
    id.key_value(&entity.pk_column)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| unaddressable(id, "object id has no integer primary key"))
}

fn select_list(entity: &EntityDescriptor) -> String {
    crate::schema::entity_columns(entity)
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_rows(
    conn: &Connection,
    resolver: &EntityResolver,
    entity: &EntityDescriptor,
    sql: &str,
    args: Vec<rusqlite::types::Value>,
) -> Result<Vec<Row>> {
    let mut targets = Vec::new();
    for relationship in entity.to_one_relationships() {
        let target = resolver
            .entity(&relationship.target_entity)
            .map_err(ExError::from)?;
        targets.push((relationship.name.clone(), target));
    }

    let mut stmt = conn.prepare(sql).map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(params_from_iter(args), |row| {
            let pk: i64 = row.get(0)?;
            let mut attributes = BTreeMap::new();
            let mut column = 1;
            for name in entity.attribute_names() {
                attributes.insert(name.to_string(), from_sql(row.get_ref(column)?));
                column += 1;
            }
            let mut to_one = BTreeMap::new();
            for (name, target) in &targets {
                let fk: Option<i64> = row.get(column)?;
                to_one.insert(
                    name.clone(),
                    fk.map(|v| ObjectId::of(&target.name, &target.pk_column, v)),
                );
                column += 1;
            }
            Ok(Row {
                id: ObjectId::of(&entity.name, &entity.pk_column, pk),
                attributes,
                to_one,
            })
        })
        .map_err(from_rusqlite)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)
}

fn read_ids(
    conn: &Connection,
    target: &EntityDescriptor,
    sql: &str,
    owner_pk: i64,
) -> Result<Vec<ObjectId>> {
    let mut stmt = conn.prepare(sql).map_err(from_rusqlite)?;
    let ids = stmt
        .query_map([owner_pk], |row| row.get::<_, i64>(0))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(ids
        .into_iter()
        .map(|pk| ObjectId::of(&target.name, &target.pk_column, pk))
        .collect())
}

impl Store {
    /// Committed row for `id`, or `None` when no such row exists
    pub fn select_row(&self, resolver: &EntityResolver, id: &ObjectId) -> Result<Option<Row>> {
        let entity = resolver.entity(id.entity_name()).map_err(ExError::from)?;
        let pk = pk_of(resolver, id)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select_list(entity),
            quote(&entity.name),
            quote(&entity.pk_column)
        );
        let mut rows = self.with_conn(|conn| {
            read_rows(
                conn,
                resolver,
                entity,
                &sql,
                vec![rusqlite::types::Value::Integer(pk)],
            )
        })?;
        Ok(rows.pop())
    }

    /// Every committed row of an entity, ordered by primary key
    pub fn select_all(&self, resolver: &EntityResolver, entity_name: &str) -> Result<Vec<Row>> {
        let entity = resolver.entity(entity_name).map_err(ExError::from)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select_list(entity),
            quote(&entity.name),
            quote(&entity.pk_column)
        );
        self.with_conn(|conn| read_rows(conn, resolver, entity, &sql, Vec::new()))
    }

    /// Ids of `target_entity` rows whose `fk_column` points at `owner`
    pub fn select_ids_by_fk(
        &self,
        resolver: &EntityResolver,
        target_entity: &str,
        fk_column: &str,
        owner: &ObjectId,
    ) -> Result<Vec<ObjectId>> {
        let target = resolver.entity(target_entity).map_err(ExError::from)?;
        let owner_pk = pk_of(resolver, owner)?;
        let sql = format!(
            "SELECT {pk} FROM {table} WHERE {fk} = ?1 ORDER BY {pk}",
            pk = quote(&target.pk_column),
            table = quote(&target.name),
            fk = quote(fk_column),
        );
        self.with_conn(|conn| read_ids(conn, target, &sql, owner_pk))
    }

    /// Targets linked to `source` through a join table
    pub fn select_flattened(
        &self,
        resolver: &EntityResolver,
        join: &JoinTable,
        target_entity: &str,
        source: &ObjectId,
    ) -> Result<Vec<ObjectId>> {
        let target = resolver.entity(target_entity).map_err(ExError::from)?;
        let source_pk = pk_of(resolver, source)?;
        let sql = format!(
            "SELECT {dst} FROM {table} WHERE {src} = ?1 ORDER BY {dst}",
            dst = quote(&join.target_column),
            table = quote(&join.name),
            src = quote(&join.source_column),
        );
        self.with_conn(|conn| read_ids(conn, target, &sql, source_pk))
    }

    /// Write a row directly, bypassing change tracking. Used to seed data.
    pub fn insert_raw(
        &self,
        resolver: &EntityResolver,
        entity_name: &str,
        pk: i64,
        attributes: &BTreeMap<String, Value>,
        to_one: &BTreeMap<String, ObjectId>,
    ) -> Result<ObjectId> {
        let entity = resolver.entity(entity_name).map_err(ExError::from)?;
        let mut columns = vec![quote(&entity.pk_column)];
        let mut values = vec![rusqlite::types::Value::Integer(pk)];
        for (name, value) in attributes {
            entity.require_attribute(name).map_err(ExError::from)?;
            columns.push(quote(name));
            values.push(to_sql(value));
        }
        for (name, target) in to_one {
            let relationship = entity.require_relationship(name).map_err(ExError::from)?;
            columns.push(quote(&relationship.fk_column()));
            values.push(rusqlite::types::Value::Integer(pk_of(resolver, target)?));
        }
        let placeholders = (1..=values.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&entity.name),
            columns.join(", "),
            placeholders
        );
        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(values))
                .map_err(from_rusqlite)
        })?;
        Ok(ObjectId::of(&entity.name, &entity.pk_column, pk))
    }

    /// Link two rows through a join table directly. Used to seed data.
    pub fn insert_join_raw(
        &self,
        resolver: &EntityResolver,
        join: &JoinTable,
        source: &ObjectId,
        target: &ObjectId,
    ) -> Result<()> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
            quote(&join.name),
            quote(&join.source_column),
            quote(&join.target_column)
        );
        let source_pk = pk_of(resolver, source)?;
        let target_pk = pk_of(resolver, target)?;
        self.with_conn(|conn| {
            conn.execute(&sql, [source_pk, target_pk])
                .map_err(from_rusqlite)
                .map(|_| ())
        })
    }
}
