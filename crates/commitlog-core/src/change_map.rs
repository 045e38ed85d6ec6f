//! Per-commit change aggregation.
//!
//! [`ChangeMapAggregator`] merges every fragment observed for one identity
//! into a single [`ObjectChange`]; [`ChangeMap`] is the frozen result handed
//! to listeners.

use crate::graph::IdMap;
use crate::model::{ObjectChange, ObjectChangeType, ObjectId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// All object changes of one commit.
///
/// The `changes` view is keyed by post-commit id, plus the pre-commit id
/// when it differs, so an inserted object is reachable under both its
/// temporary and permanent id. The `unique_changes` view holds every change
/// once, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeMap {
    unique: Vec<ObjectChange>,
    keys: Vec<ObjectId>,
    index: HashMap<ObjectId, usize>,
}

impl ChangeMap {
    /// Build from finished changes, registering their keys
    pub fn from_unique(changes: Vec<ObjectChange>) -> Self {
        let mut map = Self::default();
        for change in changes {
            let position = map.unique.len();
            map.register_key(change.post_commit_id.clone(), position);
            if change.pre_commit_id != change.post_commit_id {
                map.register_key(change.pre_commit_id.clone(), position);
            }
            map.unique.push(change);
        }
        map
    }

    fn register_key(&mut self, key: ObjectId, position: usize) {
        if self.index.insert(key.clone(), position).is_none() {
            self.keys.push(key);
        }
    }

    /// Change reachable under `id`
    pub fn get(&self, id: &ObjectId) -> Option<&ObjectChange> {
        self.index.get(id).and_then(|&i| self.unique.get(i))
    }

    /// Key → change pairs in key insertion order
    pub fn changes(&self) -> Vec<(&ObjectId, &ObjectChange)> {
        self.keys
            .iter()
            .filter_map(|key| self.get(key).map(|change| (key, change)))
            .collect()
    }

    /// Number of keys in the `changes` view
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Every distinct change once
    pub fn unique_changes(&self) -> &[ObjectChange] {
        &self.unique
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }

    /// Unique changes sorted by entity name, then post-commit id
    pub fn sorted_changes(&self) -> Vec<&ObjectChange> {
        let mut sorted: Vec<_> = self.unique.iter().collect();
        sorted.sort_by(|a, b| a.post_commit_id.cmp(&b.post_commit_id));
        sorted
    }
}

#[derive(Serialize)]
struct ChangeMapRef<'a> {
    changes: &'a [ObjectChange],
}

#[derive(Deserialize)]
struct ChangeMapOwned {
    changes: Vec<ObjectChange>,
}

impl Serialize for ChangeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ChangeMapRef {
            changes: &self.unique,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChangeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        ChangeMapOwned::deserialize(deserializer).map(|owned| ChangeMap::from_unique(owned.changes))
    }
}

struct Pending {
    change: ObjectChange,
    /// Inserted and deleted within the same commit
    cancelled: bool,
}

/// Collects fragments for one commit, merging by identity
#[derive(Default)]
pub struct ChangeMapAggregator {
    pending: Vec<Pending>,
    index: HashMap<ObjectId, usize>,
}

impl ChangeMapAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment, merging it into an earlier one for the same id.
    ///
    /// Merge rules:
    /// - INSERT and DELETE win over UPDATE; DELETE after INSERT cancels the
    ///   object entirely
    /// - attributes and to-one relationships keep the first old value and
    ///   take the last new value
    /// - to-many added/removed sets are superimposed with net-zero
    ///   cancellation
    ///
    /// Fragments are matched by pre-commit id, the identity the object had
    /// in the context while the commit was assembled.
    pub fn put(&mut self, fragment: ObjectChange) {
        match self.index.get(&fragment.pre_commit_id) {
            Some(&i) => merge(&mut self.pending[i], fragment),
            None => {
                self.index
                    .insert(fragment.pre_commit_id.clone(), self.pending.len());
                self.pending.push(Pending {
                    change: fragment,
                    cancelled: false,
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Finalize: translate ids through `id_map`, collapse to net effect and
    /// drop changes with nothing left to report.
    ///
    /// A change of any type with no property changes left is dropped. The
    /// one exception is an UPDATE whose identity changed: the id change is
    /// itself reported.
    pub fn finish(self, id_map: &IdMap) -> Vec<ObjectChange> {
        self.pending
            .into_iter()
            .filter(|p| !p.cancelled)
            .filter_map(|p| normalize(p.change, id_map))
            .collect()
    }
}

fn merge(into: &mut Pending, later: ObjectChange) {
    let target = &mut into.change;
    match (target.change_type, later.change_type) {
        (ObjectChangeType::Insert, ObjectChangeType::Delete) => into.cancelled = true,
        (ObjectChangeType::Update, escalated @ (ObjectChangeType::Insert | ObjectChangeType::Delete)) => {
            target.change_type = escalated;
        }
        _ => {}
    }

    for (name, change) in later.attribute_changes {
        target
            .attribute_changes
            .entry(name)
            .and_modify(|existing| existing.new = change.new.clone())
            .or_insert(change);
    }
    for (name, change) in later.to_one_relationship_changes {
        match target.to_one_relationship_changes.get_mut(&name) {
            Some(existing) => existing.superimpose(change),
            None => {
                target.to_one_relationship_changes.insert(name, change);
            }
        }
    }
    for (name, change) in later.to_many_relationship_changes {
        target
            .to_many_relationship_changes
            .entry(name)
            .or_default()
            .superimpose(change);
    }
}

fn normalize(mut change: ObjectChange, id_map: &IdMap) -> Option<ObjectChange> {
    change.post_commit_id = id_map.resolve(&change.pre_commit_id);

    if change.change_type == ObjectChangeType::Delete {
        for attribute in change.attribute_changes.values_mut() {
            attribute.new = serde_json::Value::Null;
        }
        for to_one in change.to_one_relationship_changes.values_mut() {
            to_one.new = None;
        }
    }

    for to_one in change.to_one_relationship_changes.values_mut() {
        to_one.old = to_one.old.as_ref().map(|id| id_map.resolve(id));
        to_one.new = to_one.new.as_ref().map(|id| id_map.resolve(id));
    }
    for to_many in change.to_many_relationship_changes.values_mut() {
        to_many.map_ids(|id| id_map.resolve(id));
    }

    change.attribute_changes.retain(|_, c| !c.is_noop());
    change.to_one_relationship_changes.retain(|_, c| !c.is_noop());
    change.to_many_relationship_changes.retain(|_, c| !c.is_empty());

    let id_changed = change.change_type == ObjectChangeType::Update
        && change.pre_commit_id != change.post_commit_id;
    if change.has_no_property_changes() && !id_changed {
        return None;
    }
    Some(change)
}
