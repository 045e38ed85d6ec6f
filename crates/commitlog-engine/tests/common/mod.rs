// Shared fixtures for engine integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use commitlog_core::metadata::{
    AttributeDescriptor, CommitLogAnnotation, DeleteRule, EntityDescriptor, EntityResolver,
    JoinTable, RelationshipDescriptor,
};
use commitlog_core::{ChangeMap, ExError, ExErrorKind, ObjectChange, ObjectId};
use commitlog_core_types::correlation::CommitId;
use commitlog_engine::{
    CommitLogListener, CommitLogModule, CommitLogModuleExtender, ObjectContext, Runtime,
};
use commitlog_store::{has_thread_transaction, Store};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const CHAR1: &str = "charProperty1";
pub const CHAR2: &str = "charProperty2";

pub fn artist_gallery() -> JoinTable {
    JoinTable::new("artist_gallery", "artist_id", "gallery_id")
}

/// Entity model shared by the integration tests
pub fn resolver() -> EntityResolver {
    EntityResolver::new()
        .with_entity(
            EntityDescriptor::new("Auditable1")
                .with_attribute(AttributeDescriptor::new(CHAR1))
                .with_attribute(AttributeDescriptor::new(CHAR2))
                .with_relationship(
                    RelationshipDescriptor::to_many("children1", "AuditableChild1")
                        .with_reverse("parent"),
                )
                .with_commit_log(CommitLogAnnotation::new()),
        )
        .with_entity(
            EntityDescriptor::new("AuditableChild1")
                .with_attribute(AttributeDescriptor::new(CHAR1))
                .with_relationship(
                    RelationshipDescriptor::to_one("parent", "Auditable1").with_reverse("children1"),
                )
                .with_commit_log(CommitLogAnnotation::new()),
        )
        .with_entity(
            EntityDescriptor::new("AuditableChild1x")
                .with_attribute(AttributeDescriptor::new(CHAR1))
                .with_relationship(RelationshipDescriptor::to_one("parent", "Auditable1"))
                .with_commit_log(CommitLogAnnotation::new()),
        )
        .with_entity(
            EntityDescriptor::new("Auditable2")
                .with_attribute(AttributeDescriptor::new(CHAR1))
                .with_attribute(AttributeDescriptor::new(CHAR2))
                .with_commit_log(
                    CommitLogAnnotation::new()
                        .ignored_properties(&[CHAR1])
                        .confidential(&[CHAR2]),
                ),
        )
        .with_entity(
            EntityDescriptor::new("Auditable3").with_attribute(AttributeDescriptor::new(CHAR1)),
        )
        .with_entity(
            EntityDescriptor::new("Auditable4")
                .with_attribute(AttributeDescriptor::new(CHAR1))
                .with_relationship(
                    RelationshipDescriptor::to_many("items", "Auditable4Item")
                        .with_reverse("owner")
                        .with_delete_rule(DeleteRule::Cascade),
                )
                .with_commit_log(CommitLogAnnotation::new()),
        )
        .with_entity(
            EntityDescriptor::new("Auditable4Item")
                .with_attribute(AttributeDescriptor::new(CHAR1))
                .with_relationship(
                    RelationshipDescriptor::to_one("owner", "Auditable4").with_reverse("items"),
                )
                .with_commit_log(CommitLogAnnotation::new()),
        )
        .with_entity(
            EntityDescriptor::new("AuditLog")
                .with_attribute(AttributeDescriptor::new("log").mandatory()),
        )
        .with_entity(
            EntityDescriptor::new("Artist")
                .with_attribute(AttributeDescriptor::new("name"))
                .with_relationship(
                    RelationshipDescriptor::flattened("galleries", "Gallery", artist_gallery())
                        .with_reverse("artists"),
                )
                .with_commit_log(CommitLogAnnotation::new()),
        )
        .with_entity(
            EntityDescriptor::new("Gallery")
                .with_attribute(AttributeDescriptor::new("name"))
                .with_relationship(
                    RelationshipDescriptor::flattened(
                        "artists",
                        "Artist",
                        artist_gallery().reversed(),
                    )
                    .with_reverse("galleries")
                    .with_delete_rule(DeleteRule::Deny),
                )
                .with_commit_log(CommitLogAnnotation::new()),
        )
}

pub fn id(entity: &str, pk: i64) -> ObjectId {
    ObjectId::of(entity, "ID", pk)
}

fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Seeded rows:
/// - Auditable1 #1 "xx" with children AuditableChild1 #1 "c1" and #2 "c2"
/// - Auditable1 #2 "zz" with child AuditableChild1 #3 "c3"
/// - Auditable4 #1 with items #1 and #2
/// - Artist #1 linked to Gallery #1; Gallery #2 unlinked
pub fn seed(runtime: &Runtime) {
    let store = runtime.store();
    let resolver = runtime.resolver();
    let none = BTreeMap::new();

    store
        .insert_raw(resolver, "Auditable1", 1, &attrs(&[(CHAR1, json!("xx"))]), &none)
        .unwrap();
    store
        .insert_raw(resolver, "Auditable1", 2, &attrs(&[(CHAR1, json!("zz"))]), &none)
        .unwrap();
    for (pk, label, parent) in [(1, "c1", 1), (2, "c2", 1), (3, "c3", 2)] {
        store
            .insert_raw(
                resolver,
                "AuditableChild1",
                pk,
                &attrs(&[(CHAR1, json!(label))]),
                &BTreeMap::from([("parent".to_string(), id("Auditable1", parent))]),
            )
            .unwrap();
    }

    store
        .insert_raw(resolver, "Auditable4", 1, &attrs(&[(CHAR1, json!("owner"))]), &none)
        .unwrap();
    for pk in [1, 2] {
        store
            .insert_raw(
                resolver,
                "Auditable4Item",
                pk,
                &attrs(&[(CHAR1, json!(format!("item{}", pk)))]),
                &BTreeMap::from([("owner".to_string(), id("Auditable4", 1))]),
            )
            .unwrap();
    }

    store
        .insert_raw(resolver, "Artist", 1, &attrs(&[("name", json!("a1"))]), &none)
        .unwrap();
    for pk in [1, 2] {
        store
            .insert_raw(
                resolver,
                "Gallery",
                pk,
                &attrs(&[("name", json!(format!("g{}", pk)))]),
                &none,
            )
            .unwrap();
    }
    store
        .insert_join_raw(
            resolver,
            &artist_gallery(),
            &id("Artist", 1),
            &id("Gallery", 1),
        )
        .unwrap();
}

/// Records every dispatched ChangeMap and the transaction state seen
#[derive(Default)]
pub struct RecordingListener {
    captured: Mutex<Vec<ChangeMap>>,
    in_transaction: Mutex<Vec<bool>>,
    commit_ids: Mutex<Vec<CommitId>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn captured(&self) -> Vec<ChangeMap> {
        self.captured.lock().unwrap().clone()
    }

    pub fn last(&self) -> ChangeMap {
        self.captured
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no ChangeMap dispatched")
    }

    pub fn in_transaction(&self) -> Vec<bool> {
        self.in_transaction.lock().unwrap().clone()
    }

    pub fn commit_ids(&self) -> Vec<CommitId> {
        self.commit_ids.lock().unwrap().clone()
    }
}

impl CommitLogListener for RecordingListener {
    fn on_post_commit(&self, origin: &ObjectContext, changes: &ChangeMap) -> Result<(), ExError> {
        self.captured.lock().unwrap().push(changes.clone());
        self.in_transaction
            .lock()
            .unwrap()
            .push(has_thread_transaction());
        if let Some(commit) = origin.commit_context() {
            self.commit_ids.lock().unwrap().push(commit.commit_id.clone());
        }
        Ok(())
    }
}

/// Always fails
pub struct FailingListener;

impl CommitLogListener for FailingListener {
    fn on_post_commit(&self, _: &ObjectContext, _: &ChangeMap) -> Result<(), ExError> {
        Err(ExError::new(ExErrorKind::Internal).with_message("listener exploded"))
    }
}

/// Runtime over a fresh seeded in-memory store with one recording listener
pub fn runtime_with(module: CommitLogModuleExtender) -> (Arc<Runtime>, Arc<RecordingListener>) {
    let listener = RecordingListener::new();
    let runtime = Runtime::builder(resolver())
        .store(Store::open_in_memory().unwrap())
        .commit_log(module.add_shared_listener(listener.clone()))
        .build()
        .unwrap();
    seed(&runtime);
    (runtime, listener)
}

pub fn default_runtime() -> (Arc<Runtime>, Arc<RecordingListener>) {
    runtime_with(CommitLogModule::extend())
}

/// Unique changes sorted by post-commit id
pub fn sorted(changes: &ChangeMap) -> Vec<ObjectChange> {
    changes.sorted_changes().into_iter().cloned().collect()
}
