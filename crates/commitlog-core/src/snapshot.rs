//! Snapshots of one object's state and the pre/post pairing used by the
//! classifier.

use crate::model::{AttributeChange, ObjectChangeType, ObjectId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Attribute values and relationship references of one object at one point
/// in time. To-many members are only present for relationships that were
/// loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub attributes: BTreeMap<String, Value>,
    pub to_one: BTreeMap<String, Option<ObjectId>>,
    pub to_many: BTreeMap<String, BTreeSet<ObjectId>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute value, `Null` when absent
    pub fn attribute(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&Value::Null)
    }

    pub fn to_one(&self, name: &str) -> Option<&ObjectId> {
        self.to_one.get(name).and_then(Option::as_ref)
    }
}

/// Read access to object state around a commit.
///
/// `committed_snapshot` is the state last read from or written to storage;
/// `current_snapshot` is the in-memory state being committed.
pub trait SnapshotSource {
    fn committed_snapshot(&self, id: &ObjectId) -> Option<Snapshot>;
    fn current_snapshot(&self, id: &ObjectId) -> Option<Snapshot>;
}

/// Lifecycle state derived from which side of a pair exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Modified,
    Deleted,
}

impl Lifecycle {
    pub fn change_type(&self) -> ObjectChangeType {
        match self {
            Lifecycle::New => ObjectChangeType::Insert,
            Lifecycle::Modified => ObjectChangeType::Update,
            Lifecycle::Deleted => ObjectChangeType::Delete,
        }
    }
}

/// Pre-commit and post-commit state of one identity
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPair {
    pub id: ObjectId,
    pub pre: Option<Snapshot>,
    pub post: Option<Snapshot>,
}

impl SnapshotPair {
    pub fn new(id: ObjectId, pre: Option<Snapshot>, post: Option<Snapshot>) -> Self {
        Self { id, pre, post }
    }

    /// `None` when neither side exists
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        match (&self.pre, &self.post) {
            (None, Some(_)) => Some(Lifecycle::New),
            (Some(_), Some(_)) => Some(Lifecycle::Modified),
            (Some(_), None) => Some(Lifecycle::Deleted),
            (None, None) => None,
        }
    }

    /// Changes for every listed attribute whose value differs between the
    /// two sides; a missing side reads as all-null
    pub fn attribute_changes<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, AttributeChange> {
        let mut changes = BTreeMap::new();
        for name in names {
            let old = self.pre.as_ref().map(|s| s.attribute(name)).unwrap_or(&Value::Null);
            let new = self.post.as_ref().map(|s| s.attribute(name)).unwrap_or(&Value::Null);
            if old != new {
                changes.insert(
                    name.to_string(),
                    AttributeChange::new(old.clone(), new.clone()),
                );
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        let mut s = Snapshot::new();
        s.attributes.insert("charProperty1".to_string(), value);
        s.attributes.insert("charProperty2".to_string(), json!("same"));
        s
    }

    #[test]
    fn test_lifecycle_from_sides() {
        let id = ObjectId::of("Auditable1", "ID", 1);
        let s = Snapshot::new();
        assert_eq!(
            SnapshotPair::new(id.clone(), None, Some(s.clone())).lifecycle(),
            Some(Lifecycle::New)
        );
        assert_eq!(
            SnapshotPair::new(id.clone(), Some(s.clone()), Some(s.clone())).lifecycle(),
            Some(Lifecycle::Modified)
        );
        assert_eq!(
            SnapshotPair::new(id.clone(), Some(s), None).lifecycle(),
            Some(Lifecycle::Deleted)
        );
        assert_eq!(SnapshotPair::new(id, None, None).lifecycle(), None);
    }

    #[test]
    fn test_only_differing_attributes_recorded() {
        let pair = SnapshotPair::new(
            ObjectId::of("Auditable1", "ID", 1),
            Some(snapshot(json!("xx"))),
            Some(snapshot(json!("yy"))),
        );
        let changes = pair.attribute_changes(["charProperty1", "charProperty2"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes["charProperty1"],
            AttributeChange::new(json!("xx"), json!("yy"))
        );
    }

    #[test]
    fn test_new_object_records_non_null_values_only() {
        let mut post = snapshot(json!("yy"));
        post.attributes.insert("charProperty3".to_string(), Value::Null);
        let pair = SnapshotPair::new(ObjectId::temporary("Auditable1"), None, Some(post));

        let changes = pair.attribute_changes(["charProperty1", "charProperty2", "charProperty3"]);
        assert_eq!(changes.len(), 2);
        assert!(changes.values().all(|c| c.old.is_null()));
        assert!(!changes.contains_key("charProperty3"));
    }

    #[test]
    fn test_deleted_object_records_old_values() {
        let pair = SnapshotPair::new(
            ObjectId::of("Auditable1", "ID", 1),
            Some(snapshot(json!("xx"))),
            None,
        );
        let changes = pair.attribute_changes(["charProperty1"]);
        assert_eq!(
            changes["charProperty1"],
            AttributeChange::new(json!("xx"), Value::Null)
        );
    }
}
