//! Object context: one unit of work over the persistent object graph.
//!
//! Every mutation updates the in-memory snapshot of the touched objects and
//! appends the matching `GraphDiff` events. Relationship mutations record
//! both ends when the relationship has a reverse. `commit_changes()` hands
//! the accumulated state to the commit orchestrator.
//!
//! To-many membership is not stored on the owner. Direct to-many members
//! are read from the children's foreign keys and overlaid with the
//! children registered here; flattened members are read from the join
//! table and replayed against the pending arc events.

use crate::callbacks::LifecyclePhase;
use crate::runtime::Runtime;
use crate::Result;
use commitlog_core::metadata::{DeleteRule, RelationshipDescriptor, RelationshipKind};
use commitlog_core::{
    log_op_end, log_op_error, log_op_start, CommitLogError, ExError, ExErrorKind, GraphDiff,
    IdMap, ObjectId, Snapshot, SnapshotSource,
};
use commitlog_core_types::correlation::{CommitContext, ContextId};
use commitlog_store::{FlushBatch, JoinRow, KeyChange, Row, RowWrite};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceState {
    /// Created in this context, not yet inserted
    New,
    /// Unchanged since the last read or commit
    Committed,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
struct PersistentObject {
    state: PersistenceState,
    current: Snapshot,
    /// `None` until the object has been stored
    committed: Option<Snapshot>,
    /// Caller-chosen key applied at commit
    new_key: Option<ObjectId>,
}

impl PersistentObject {
    fn pending_phase(&self) -> Option<LifecyclePhase> {
        match (self.state, self.committed.is_some()) {
            (PersistenceState::New, _) => Some(LifecyclePhase::PrePersist),
            (PersistenceState::Modified, _) => Some(LifecyclePhase::PreUpdate),
            (PersistenceState::Deleted, true) => Some(LifecyclePhase::PreRemove),
            _ => None,
        }
    }
}

pub struct ObjectContext {
    runtime: Arc<Runtime>,
    context_id: ContextId,
    objects: BTreeMap<ObjectId, PersistentObject>,
    diffs: Vec<GraphDiff>,
    current_commit: Option<CommitContext>,
}

fn domain(op: &'static str) -> impl Fn(CommitLogError) -> ExError {
    move |err| ExError::from(err).with_op(op)
}

fn invalid_operation(
    relationship: &RelationshipDescriptor,
    entity: &str,
    reason: &str,
) -> CommitLogError {
    CommitLogError::InvalidRelationshipOperation {
        entity: entity.to_string(),
        relationship: relationship.name.clone(),
        reason: reason.to_string(),
    }
}

fn rekey(snapshot: &mut Snapshot, id_map: &IdMap) {
    for target in snapshot.to_one.values_mut().flatten() {
        *target = id_map.resolve(target);
    }
    for members in snapshot.to_many.values_mut() {
        *members = members.iter().map(|m| id_map.resolve(m)).collect();
    }
}

impl ObjectContext {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            context_id: ContextId::new(),
            objects: BTreeMap::new(),
            diffs: Vec::new(),
            current_commit: None,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    /// Correlation of the commit in progress, if any
    pub fn commit_context(&self) -> Option<&CommitContext> {
        self.current_commit.as_ref()
    }

    /// True when mutations are waiting to be committed
    pub fn has_changes(&self) -> bool {
        !self.diffs.is_empty()
    }

    /// Graph events recorded since the last commit
    pub fn diffs(&self) -> &[GraphDiff] {
        &self.diffs
    }

    pub fn state(&self, id: &ObjectId) -> Option<PersistenceState> {
        self.objects.get(id).map(|o| o.state)
    }

    // ===== Reads =====

    /// Register a stored object by entity and primary key value
    ///
    /// # Errors
    ///
    /// `NotFound` when no such row exists.
    pub fn select_by_id(&mut self, entity: &str, pk: i64) -> Result<ObjectId> {
        let runtime = Arc::clone(&self.runtime);
        let descriptor = runtime
            .resolver()
            .entity(entity)
            .map_err(domain("select_by_id"))?;
        let id = ObjectId::of(&descriptor.name, &descriptor.pk_column, pk);
        self.ensure_registered(&id)?;
        Ok(id)
    }

    /// Register every stored object of an entity; returns the ids not
    /// deleted in this context
    pub fn select_all(&mut self, entity: &str) -> Result<Vec<ObjectId>> {
        let runtime = Arc::clone(&self.runtime);
        let rows = runtime.store().select_all(runtime.resolver(), entity)?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id = self.register_row(row);
            if self.state(&id) != Some(PersistenceState::Deleted) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Current in-memory state of an object
    pub fn snapshot(&mut self, id: &ObjectId) -> Result<Snapshot> {
        self.ensure_registered(id)?;
        Ok(self.object(id)?.current.clone())
    }

    pub fn attribute(&mut self, id: &ObjectId, name: &str) -> Result<Value> {
        self.ensure_registered(id)?;
        let runtime = Arc::clone(&self.runtime);
        runtime
            .resolver()
            .entity(id.entity_name())
            .and_then(|e| e.require_attribute(name))
            .map_err(domain("attribute"))?;
        Ok(self.object(id)?.current.attribute(name).clone())
    }

    pub fn to_one(&mut self, id: &ObjectId, relationship: &str) -> Result<Option<ObjectId>> {
        self.ensure_registered(id)?;
        let runtime = Arc::clone(&self.runtime);
        let rel = self.relationship_of(&runtime, id, relationship, RelationshipKind::ToOne)?;
        Ok(self.object(id)?.current.to_one(&rel.name).cloned())
    }

    /// Members of a to-many relationship, ordered by id
    pub fn to_many(&mut self, id: &ObjectId, relationship: &str) -> Result<Vec<ObjectId>> {
        self.ensure_registered(id)?;
        let runtime = Arc::clone(&self.runtime);
        let rel = self.relationship_of(&runtime, id, relationship, RelationshipKind::ToMany)?;
        Ok(self.members(&runtime, id, rel)?.into_iter().collect())
    }

    // ===== Mutations =====

    /// Create an object with every attribute null; it gets a temporary id
    /// until committed
    pub fn new_object(&mut self, entity: &str) -> Result<ObjectId> {
        let runtime = Arc::clone(&self.runtime);
        let descriptor = runtime
            .resolver()
            .entity(entity)
            .map_err(domain("new_object"))?;

        let mut current = Snapshot::new();
        for name in descriptor.attribute_names() {
            current.attributes.insert(name.to_string(), Value::Null);
        }
        for rel in descriptor.to_one_relationships() {
            current.to_one.insert(rel.name.clone(), None);
        }

        let id = ObjectId::temporary(&descriptor.name);
        self.objects.insert(
            id.clone(),
            PersistentObject {
                state: PersistenceState::New,
                current,
                committed: None,
                new_key: None,
            },
        );
        self.diffs.push(GraphDiff::NodeCreated {
            node_id: id.clone(),
        });
        Ok(id)
    }

    pub fn set_attribute(
        &mut self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        self.ensure_live(id)?;
        let runtime = Arc::clone(&self.runtime);
        runtime
            .resolver()
            .entity(id.entity_name())
            .and_then(|e| e.require_attribute(name))
            .map_err(domain("set_attribute"))?;

        let object = self.object_mut(id)?;
        let old = object.current.attribute(name).clone();
        if old == value {
            return Ok(());
        }
        object
            .current
            .attributes
            .insert(name.to_string(), value.clone());
        self.mark_modified(id);
        self.diffs.push(GraphDiff::PropertyChanged {
            node_id: id.clone(),
            property: name.to_string(),
            old,
            new: value,
        });
        Ok(())
    }

    /// Give an object a caller-chosen primary key; returns the id the
    /// object has after commit.
    ///
    /// A new object is inserted with the key. A stored object keeps its
    /// current id in this context until commit, which moves its row and
    /// every reference to it and reports an UPDATE whose pre- and
    /// post-commit ids differ.
    ///
    /// # Errors
    ///
    /// `InvalidObjectId` when another object of this context holds or is
    /// about to take the key.
    pub fn set_primary_key(&mut self, id: &ObjectId, pk: i64) -> Result<ObjectId> {
        self.ensure_live(id)?;
        let runtime = Arc::clone(&self.runtime);
        let descriptor = runtime
            .resolver()
            .entity(id.entity_name())
            .map_err(domain("set_primary_key"))?;
        let key = ObjectId::of(&descriptor.name, &descriptor.pk_column, pk);

        let taken = self
            .objects
            .iter()
            .any(|(other, o)| other != id && (*other == key || o.new_key.as_ref() == Some(&key)));
        if taken {
            return Err(ExError::new(ExErrorKind::InvalidObjectId)
                .with_op("set_primary_key")
                .with_entity(id.entity_name())
                .with_object_id(key.to_string())
                .with_message("primary key is already in use"));
        }

        let object = self.object_mut(id)?;
        if id.is_temporary() {
            object.new_key = Some(key.clone());
            return Ok(key);
        }
        let pending = (key != *id).then(|| key.clone());
        if object.new_key == pending {
            return Ok(key);
        }
        object.new_key = pending;
        self.mark_modified(id);
        self.diffs.push(GraphDiff::NodeIdChanged {
            node_id: id.clone(),
            new_id: key.clone(),
        });
        Ok(key)
    }

    /// Point a to-one relationship at `target`, or unset it with `None`
    pub fn set_to_one(
        &mut self,
        id: &ObjectId,
        relationship: &str,
        target: Option<&ObjectId>,
    ) -> Result<()> {
        self.ensure_live(id)?;
        let runtime = Arc::clone(&self.runtime);
        let rel = self.relationship_of(&runtime, id, relationship, RelationshipKind::ToOne)?;
        if let Some(target) = target {
            self.check_target(rel, target)?;
            self.ensure_live(target)?;
        }
        self.link_to_one(&runtime, id, rel, target.cloned())
    }

    pub fn add_to_many(&mut self, id: &ObjectId, relationship: &str, target: &ObjectId) -> Result<()> {
        self.ensure_live(id)?;
        let runtime = Arc::clone(&self.runtime);
        let rel = self.relationship_of(&runtime, id, relationship, RelationshipKind::ToMany)?;
        self.check_target(rel, target)?;
        self.ensure_live(target)?;

        if rel.is_flattened() {
            if self.members(&runtime, id, rel)?.contains(target) {
                return Ok(());
            }
            let reverse = runtime.resolver().reverse_of(rel).map_err(domain("add_to_many"))?;
            self.push_arc(id, target, &rel.name, true);
            if let Some(reverse) = reverse {
                self.push_arc(target, id, &reverse.name, true);
            }
            Ok(())
        } else {
            let reverse = self.direct_reverse(&runtime, id, rel)?;
            self.link_to_one(&runtime, target, reverse, Some(id.clone()))
        }
    }

    pub fn remove_from_many(
        &mut self,
        id: &ObjectId,
        relationship: &str,
        target: &ObjectId,
    ) -> Result<()> {
        self.ensure_live(id)?;
        let runtime = Arc::clone(&self.runtime);
        let rel = self.relationship_of(&runtime, id, relationship, RelationshipKind::ToMany)?;
        self.check_target(rel, target)?;

        if rel.is_flattened() {
            if !self.members(&runtime, id, rel)?.contains(target) {
                return Ok(());
            }
            let reverse = runtime
                .resolver()
                .reverse_of(rel)
                .map_err(domain("remove_from_many"))?;
            self.push_arc(id, target, &rel.name, false);
            if let Some(reverse) = reverse {
                self.push_arc(target, id, &reverse.name, false);
            }
            Ok(())
        } else {
            self.ensure_live(target)?;
            let reverse = self.direct_reverse(&runtime, id, rel)?;
            if self.object(target)?.current.to_one(&reverse.name) != Some(id) {
                return Ok(());
            }
            self.link_to_one(&runtime, target, reverse, None)
        }
    }

    /// Delete an object, applying the delete rule of each relationship.
    ///
    /// `Cascade` relationships delete their related objects too; every
    /// other relationship of a deleted object is unset on both ends.
    ///
    /// # Errors
    ///
    /// `DeleteDenied` when a `Deny` relationship of any object in the
    /// cascade still has related objects. Nothing is changed in that case.
    pub fn delete_object(&mut self, id: &ObjectId) -> Result<()> {
        self.ensure_live(id)?;
        let runtime = Arc::clone(&self.runtime);
        let resolver = runtime.resolver();

        let mut closure = vec![id.clone()];
        let mut seen: BTreeSet<ObjectId> = closure.iter().cloned().collect();
        let mut next = 0;
        while next < closure.len() {
            let current = closure[next].clone();
            next += 1;
            let entity = resolver
                .entity(current.entity_name())
                .map_err(domain("delete_object"))?;
            for rel in &entity.relationships {
                let related = self.related(&runtime, &current, rel)?;
                match rel.delete_rule {
                    DeleteRule::Nullify => {}
                    DeleteRule::Cascade => {
                        for target in related {
                            self.ensure_registered(&target)?;
                            if self.state(&target) != Some(PersistenceState::Deleted)
                                && seen.insert(target.clone())
                            {
                                closure.push(target);
                            }
                        }
                    }
                    DeleteRule::Deny => {
                        if !related.is_empty() {
                            return Err(ExError::from(CommitLogError::DeleteDenied {
                                object_id: current.to_string(),
                                relationship: rel.name.clone(),
                            })
                            .with_op("delete_object")
                            .with_entity(current.entity_name()));
                        }
                    }
                }
            }
        }

        for current in &closure {
            let entity = resolver
                .entity(current.entity_name())
                .map_err(domain("delete_object"))?;
            for rel in &entity.relationships {
                match (rel.kind, rel.is_flattened()) {
                    (RelationshipKind::ToOne, _) => {
                        self.link_to_one(&runtime, current, rel, None)?;
                    }
                    (RelationshipKind::ToMany, false) => {
                        let reverse = self.direct_reverse(&runtime, current, rel)?;
                        for member in self.members(&runtime, current, rel)? {
                            self.ensure_registered(&member)?;
                            self.link_to_one(&runtime, &member, reverse, None)?;
                        }
                    }
                    (RelationshipKind::ToMany, true) => {
                        let reverse = resolver.reverse_of(rel).map_err(domain("delete_object"))?;
                        for member in self.members(&runtime, current, rel)? {
                            self.push_arc(current, &member, &rel.name, false);
                            if let Some(reverse) = reverse {
                                self.push_arc(&member, current, &reverse.name, false);
                            }
                        }
                    }
                }
            }
        }

        for current in closure {
            let object = self.object_mut(&current)?;
            object.state = PersistenceState::Deleted;
            // a deleted row keeps its key
            if object.new_key.take().is_some() && !current.is_temporary() {
                self.diffs.push(GraphDiff::NodeIdChanged {
                    node_id: current.clone(),
                    new_id: current.clone(),
                });
            }
            self.diffs.push(GraphDiff::NodeRemoved { node_id: current });
        }
        Ok(())
    }

    /// Discard uncommitted changes
    pub fn rollback_changes(&mut self) {
        self.objects.retain(|_, o| o.committed.is_some());
        for object in self.objects.values_mut() {
            if let Some(committed) = &object.committed {
                object.current = committed.clone();
            }
            object.state = PersistenceState::Committed;
            object.new_key = None;
        }
        self.diffs.clear();
    }

    /// Flush all pending changes and notify commit log listeners.
    ///
    /// # Errors
    ///
    /// - `CallbackFailed` when a lifecycle callback fails (nothing written)
    /// - `FlushFailed` when the store rejects the batch (rolled back)
    /// - `ListenerFailed` when a listener fails; the data stays committed
    /// - `TransactionRolledBack` when a joined transaction forced rollback
    pub fn commit_changes(&mut self) -> Result<()> {
        let started = Instant::now();
        let commit = CommitContext::new(self.context_id.clone());
        log_op_start!(
            "commit_changes",
            commit_id = commit.commit_id.as_str(),
            context_id = self.context_id.as_str()
        );

        self.current_commit = Some(commit.clone());
        let runtime = Arc::clone(&self.runtime);
        let result = runtime.commit_log().commit(self, &commit);
        self.current_commit = None;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => log_op_end!(
                "commit_changes",
                duration_ms = duration_ms,
                commit_id = commit.commit_id.as_str()
            ),
            Err(err) => log_op_error!(
                "commit_changes",
                err.clone(),
                duration_ms = duration_ms,
                commit_id = commit.commit_id.as_str()
            ),
        }
        result
    }

    // ===== Commit support =====

    /// Run lifecycle callbacks until every pending object has seen the
    /// callbacks of its current phase once
    pub(crate) fn run_callbacks(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        if runtime.callbacks().is_empty() {
            return Ok(());
        }

        let mut done: BTreeSet<(ObjectId, LifecyclePhase)> = BTreeSet::new();
        loop {
            let pending: Vec<(ObjectId, LifecyclePhase)> = self
                .objects
                .iter()
                .filter_map(|(id, o)| o.pending_phase().map(|phase| (id.clone(), phase)))
                .filter(|key| !done.contains(key))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            for (id, phase) in pending {
                done.insert((id.clone(), phase));
                // an earlier callback may have moved the object on
                if self.objects.get(&id).and_then(|o| o.pending_phase()) != Some(phase) {
                    continue;
                }
                for callback in runtime.callbacks().for_phase(id.entity_name(), phase) {
                    callback(self, &id).map_err(|err| {
                        ExError::new(ExErrorKind::CallbackFailed)
                            .with_op("pre_commit")
                            .with_entity(id.entity_name())
                            .with_object_id(id.to_string())
                            .with_message(format!("{} callback failed", phase.as_str()))
                            .with_source(err)
                    })?;
                }
            }
        }
    }

    fn is_discarded(&self, id: &ObjectId) -> bool {
        id.is_temporary()
            && self
                .objects
                .get(id)
                .map(|o| o.state == PersistenceState::Deleted)
                .unwrap_or(true)
    }

    /// Row and join-table operations for the pending changes
    pub(crate) fn build_batch(&self) -> Result<FlushBatch> {
        let resolver = self.runtime.resolver();
        let mut batch = FlushBatch::new();

        for (id, object) in &self.objects {
            let write = || RowWrite {
                id: id.clone(),
                attributes: object.current.attributes.clone(),
                to_one: object.current.to_one.clone(),
            };
            if let (Some(key), PersistenceState::New | PersistenceState::Modified) =
                (&object.new_key, object.state)
            {
                batch.key_changes.push(KeyChange {
                    from: id.clone(),
                    to: key.clone(),
                });
            }
            match object.state {
                PersistenceState::New => batch.inserts.push(write()),
                PersistenceState::Modified => batch.updates.push(write()),
                PersistenceState::Deleted if object.committed.is_some() => {
                    batch.deletes.push(id.clone())
                }
                _ => {}
            }
        }

        // last operation per join row wins
        let mut joins: BTreeMap<(String, ObjectId, ObjectId), (JoinRow, bool)> = BTreeMap::new();
        for diff in &self.diffs {
            let (node, target, arc, created) = match diff {
                GraphDiff::ArcCreated {
                    node_id,
                    target_id,
                    arc,
                } => (node_id, target_id, arc, true),
                GraphDiff::ArcDeleted {
                    node_id,
                    target_id,
                    arc,
                } => (node_id, target_id, arc, false),
                _ => continue,
            };
            let entity = resolver
                .entity(node.entity_name())
                .map_err(domain("commit_changes"))?;
            let Some(join) = entity
                .relationship(arc)
                .and_then(|r| r.flattened_through.as_ref())
            else {
                continue;
            };
            if self.is_discarded(node) || self.is_discarded(target) {
                continue;
            }
            let row = if join.source_column <= join.target_column {
                JoinRow {
                    join: join.clone(),
                    source: node.clone(),
                    target: target.clone(),
                }
            } else {
                JoinRow {
                    join: join.reversed(),
                    source: target.clone(),
                    target: node.clone(),
                }
            };
            joins.insert(
                (row.join.name.clone(), row.source.clone(), row.target.clone()),
                (row, created),
            );
        }
        for (row, created) in joins.into_values() {
            if created {
                batch.join_inserts.push(row);
            } else {
                batch.join_deletes.push(row);
            }
        }

        Ok(batch)
    }

    /// Adopt the committed state: permanent ids, fresh committed
    /// snapshots, deleted objects forgotten. `id_map` carries generated
    /// keys and moved keys alike.
    pub(crate) fn post_commit(&mut self, id_map: &IdMap) {
        let objects = std::mem::take(&mut self.objects);
        for (id, mut object) in objects {
            if object.state == PersistenceState::Deleted {
                continue;
            }
            rekey(&mut object.current, id_map);
            object.committed = Some(object.current.clone());
            object.state = PersistenceState::Committed;
            object.new_key = None;
            self.objects.insert(id_map.resolve(&id), object);
        }
        self.diffs.clear();
    }

    // ===== Internals =====

    fn object(&self, id: &ObjectId) -> Result<&PersistentObject> {
        self.objects.get(id).ok_or_else(|| {
            ExError::from(CommitLogError::ObjectNotFound {
                object_id: id.to_string(),
            })
        })
    }

    fn object_mut(&mut self, id: &ObjectId) -> Result<&mut PersistentObject> {
        self.objects.get_mut(id).ok_or_else(|| {
            ExError::from(CommitLogError::ObjectNotFound {
                object_id: id.to_string(),
            })
        })
    }

    fn register_row(&mut self, row: Row) -> ObjectId {
        let id = row.id.clone();
        let snapshot = row.into_snapshot();
        self.objects
            .entry(id.clone())
            .or_insert_with(|| PersistentObject {
                state: PersistenceState::Committed,
                current: snapshot.clone(),
                committed: Some(snapshot),
                new_key: None,
            });
        id
    }

    fn ensure_registered(&mut self, id: &ObjectId) -> Result<()> {
        if self.objects.contains_key(id) {
            return Ok(());
        }
        let not_found = || {
            ExError::from(CommitLogError::ObjectNotFound {
                object_id: id.to_string(),
            })
        };
        if id.is_temporary() {
            return Err(not_found());
        }
        let runtime = Arc::clone(&self.runtime);
        let row = runtime
            .store()
            .select_row(runtime.resolver(), id)?
            .ok_or_else(not_found)?;
        self.register_row(row);
        Ok(())
    }

    fn ensure_live(&mut self, id: &ObjectId) -> Result<()> {
        self.ensure_registered(id)?;
        if self.state(id) == Some(PersistenceState::Deleted) {
            return Err(ExError::from(CommitLogError::ObjectDeleted {
                object_id: id.to_string(),
            }));
        }
        Ok(())
    }

    fn mark_modified(&mut self, id: &ObjectId) {
        if let Some(object) = self.objects.get_mut(id) {
            if object.state == PersistenceState::Committed {
                object.state = PersistenceState::Modified;
            }
        }
    }

    fn push_arc(&mut self, node: &ObjectId, target: &ObjectId, arc: &str, created: bool) {
        self.mark_modified(node);
        let (node_id, target_id, arc) = (node.clone(), target.clone(), arc.to_string());
        self.diffs.push(if created {
            GraphDiff::ArcCreated {
                node_id,
                target_id,
                arc,
            }
        } else {
            GraphDiff::ArcDeleted {
                node_id,
                target_id,
                arc,
            }
        });
    }

    fn relationship_of<'r>(
        &self,
        runtime: &'r Runtime,
        id: &ObjectId,
        name: &str,
        kind: RelationshipKind,
    ) -> Result<&'r RelationshipDescriptor> {
        let entity = runtime
            .resolver()
            .entity(id.entity_name())
            .map_err(domain("relationship"))?;
        let rel = entity
            .require_relationship(name)
            .map_err(domain("relationship"))?;
        if rel.kind != kind {
            let reason = match kind {
                RelationshipKind::ToOne => "not a to-one relationship",
                RelationshipKind::ToMany => "not a to-many relationship",
            };
            return Err(ExError::from(invalid_operation(rel, &entity.name, reason)));
        }
        Ok(rel)
    }

    /// The to-one on the child side of a direct to-many
    fn direct_reverse<'r>(
        &self,
        runtime: &'r Runtime,
        owner: &ObjectId,
        rel: &RelationshipDescriptor,
    ) -> Result<&'r RelationshipDescriptor> {
        runtime
            .resolver()
            .reverse_of(rel)
            .map_err(domain("relationship"))?
            .ok_or_else(|| {
                ExError::from(invalid_operation(
                    rel,
                    owner.entity_name(),
                    "direct to-many has no reverse to-one",
                ))
            })
    }

    fn check_target(&self, rel: &RelationshipDescriptor, target: &ObjectId) -> Result<()> {
        if target.entity_name() != rel.target_entity {
            return Err(ExError::from(CommitLogError::TargetEntityMismatch {
                relationship: rel.name.clone(),
                expected: rel.target_entity.clone(),
                actual: target.entity_name().to_string(),
            }));
        }
        Ok(())
    }

    /// Set a to-one on `id` and record arcs on both ends
    fn link_to_one(
        &mut self,
        runtime: &Runtime,
        id: &ObjectId,
        rel: &RelationshipDescriptor,
        new: Option<ObjectId>,
    ) -> Result<()> {
        let old = self.object(id)?.current.to_one(&rel.name).cloned();
        if old == new {
            return Ok(());
        }
        let reverse = runtime.resolver().reverse_of(rel).map_err(domain("relationship"))?;

        self.object_mut(id)?
            .current
            .to_one
            .insert(rel.name.clone(), new.clone());

        if let Some(old) = &old {
            self.push_arc(id, old, &rel.name, false);
            if let Some(reverse) = reverse {
                self.push_arc(old, id, &reverse.name, false);
            }
        }
        if let Some(new) = &new {
            self.push_arc(id, new, &rel.name, true);
            if let Some(reverse) = reverse {
                self.push_arc(new, id, &reverse.name, true);
            }
        }
        Ok(())
    }

    fn related(
        &self,
        runtime: &Runtime,
        id: &ObjectId,
        rel: &RelationshipDescriptor,
    ) -> Result<Vec<ObjectId>> {
        match rel.kind {
            RelationshipKind::ToOne => Ok(self
                .object(id)?
                .current
                .to_one(&rel.name)
                .cloned()
                .into_iter()
                .collect()),
            RelationshipKind::ToMany => Ok(self.members(runtime, id, rel)?.into_iter().collect()),
        }
    }

    fn members(
        &self,
        runtime: &Runtime,
        owner: &ObjectId,
        rel: &RelationshipDescriptor,
    ) -> Result<BTreeSet<ObjectId>> {
        let store = runtime.store();
        let resolver = runtime.resolver();
        let mut members = BTreeSet::new();

        match &rel.flattened_through {
            Some(join) => {
                if !owner.is_temporary() {
                    members.extend(store.select_flattened(
                        resolver,
                        join,
                        &rel.target_entity,
                        owner,
                    )?);
                }
                for diff in &self.diffs {
                    match diff {
                        GraphDiff::ArcCreated {
                            node_id,
                            target_id,
                            arc,
                        } if node_id == owner && *arc == rel.name => {
                            members.insert(target_id.clone());
                        }
                        GraphDiff::ArcDeleted {
                            node_id,
                            target_id,
                            arc,
                        } if node_id == owner && *arc == rel.name => {
                            members.remove(target_id);
                        }
                        _ => {}
                    }
                }
                members.retain(|m| self.state(m) != Some(PersistenceState::Deleted));
            }
            None => {
                let reverse = self.direct_reverse(runtime, owner, rel)?;
                if !owner.is_temporary() {
                    let stored = store.select_ids_by_fk(
                        resolver,
                        &rel.target_entity,
                        &reverse.fk_column(),
                        owner,
                    )?;
                    members.extend(
                        stored
                            .into_iter()
                            .filter(|child| !self.objects.contains_key(child)),
                    );
                }
                for (child, object) in &self.objects {
                    if child.entity_name() == rel.target_entity
                        && object.state != PersistenceState::Deleted
                        && object.current.to_one(&reverse.name) == Some(owner)
                    {
                        members.insert(child.clone());
                    }
                }
            }
        }
        Ok(members)
    }
}

impl SnapshotSource for ObjectContext {
    fn committed_snapshot(&self, id: &ObjectId) -> Option<Snapshot> {
        self.objects.get(id).and_then(|o| o.committed.clone())
    }

    fn current_snapshot(&self, id: &ObjectId) -> Option<Snapshot> {
        self.objects.get(id).map(|o| o.current.clone())
    }
}

impl std::fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContext")
            .field("context_id", &self.context_id)
            .field("objects", &self.objects.len())
            .field("diffs", &self.diffs.len())
            .finish()
    }
}
