//! Per-commit change records.
//!
//! These are plain values: ids and JSON scalars, never references into a
//! live object graph, so a listener may keep them after the commit returns.

use crate::model::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Classification of an [`ObjectChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectChangeType {
    Insert,
    Update,
    Delete,
}

impl ObjectChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectChangeType::Insert => "INSERT",
            ObjectChangeType::Update => "UPDATE",
            ObjectChangeType::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ObjectChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Old and new value of one attribute. `Null` stands for "no value".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

impl AttributeChange {
    pub fn new(old: serde_json::Value, new: serde_json::Value) -> Self {
        Self { old, new }
    }

    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Old and new target of a to-one relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToOneRelationshipChange {
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

impl ToOneRelationshipChange {
    pub fn new(old: Option<ObjectId>, new: Option<ObjectId>) -> Self {
        Self { old, new }
    }

    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Targets added to and removed from a to-many relationship.
///
/// The two sets are kept disjoint: recording an id on one side cancels a
/// pending entry for the same id on the other side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToManyRelationshipChange {
    pub added: BTreeSet<ObjectId>,
    pub removed: BTreeSet<ObjectId>,
}

impl ToManyRelationshipChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// All changes of one persistent object within one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    #[serde(rename = "type")]
    pub change_type: ObjectChangeType,
    pub pre_commit_id: ObjectId,
    pub post_commit_id: ObjectId,
    #[serde(default)]
    pub attribute_changes: BTreeMap<String, AttributeChange>,
    #[serde(default)]
    pub to_one_relationship_changes: BTreeMap<String, ToOneRelationshipChange>,
    #[serde(default)]
    pub to_many_relationship_changes: BTreeMap<String, ToManyRelationshipChange>,
}

impl ObjectChange {
    /// Empty change for `id`; pre and post ids start out equal
    pub fn new(change_type: ObjectChangeType, id: ObjectId) -> Self {
        Self {
            change_type,
            pre_commit_id: id.clone(),
            post_commit_id: id,
            attribute_changes: BTreeMap::new(),
            to_one_relationship_changes: BTreeMap::new(),
            to_many_relationship_changes: BTreeMap::new(),
        }
    }

    /// True when no attribute or relationship change is recorded
    pub fn has_no_property_changes(&self) -> bool {
        self.attribute_changes.is_empty()
            && self.to_one_relationship_changes.is_empty()
            && self.to_many_relationship_changes.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeChange> {
        self.attribute_changes.get(name)
    }

    pub fn to_one(&self, name: &str) -> Option<&ToOneRelationshipChange> {
        self.to_one_relationship_changes.get(name)
    }

    pub fn to_many(&self, name: &str) -> Option<&ToManyRelationshipChange> {
        self.to_many_relationship_changes.get(name)
    }
}
