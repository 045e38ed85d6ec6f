//! Object graph diff events and the temporary → permanent id map.

use crate::model::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One low-level mutation of the object graph, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphDiff {
    NodeCreated {
        node_id: ObjectId,
    },
    NodeRemoved {
        node_id: ObjectId,
    },
    NodeIdChanged {
        node_id: ObjectId,
        new_id: ObjectId,
    },
    PropertyChanged {
        node_id: ObjectId,
        property: String,
        old: serde_json::Value,
        new: serde_json::Value,
    },
    ArcCreated {
        node_id: ObjectId,
        target_id: ObjectId,
        arc: String,
    },
    ArcDeleted {
        node_id: ObjectId,
        target_id: ObjectId,
        arc: String,
    },
}

impl GraphDiff {
    /// The object the event belongs to
    pub fn node_id(&self) -> &ObjectId {
        match self {
            GraphDiff::NodeCreated { node_id }
            | GraphDiff::NodeRemoved { node_id }
            | GraphDiff::NodeIdChanged { node_id, .. }
            | GraphDiff::PropertyChanged { node_id, .. }
            | GraphDiff::ArcCreated { node_id, .. }
            | GraphDiff::ArcDeleted { node_id, .. } => node_id,
        }
    }
}

/// Temporary (or replaced) id → permanent id, produced by a successful flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    entries: BTreeMap<ObjectId, ObjectId>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: ObjectId, to: ObjectId) {
        self.entries.insert(from, to);
    }

    pub fn get(&self, id: &ObjectId) -> Option<&ObjectId> {
        self.entries.get(id)
    }

    /// Final id for `id`; unmapped ids are returned unchanged
    pub fn resolve(&self, id: &ObjectId) -> ObjectId {
        self.entries.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &ObjectId)> {
        self.entries.iter()
    }

    /// `NodeIdChanged` events for every mapping
    pub fn to_diffs(&self) -> Vec<GraphDiff> {
        self.entries
            .iter()
            .map(|(from, to)| GraphDiff::NodeIdChanged {
                node_id: from.clone(),
                new_id: to.clone(),
            })
            .collect()
    }

    /// Collect the mappings carried by `NodeIdChanged` events
    pub fn from_diffs<'a>(diffs: impl IntoIterator<Item = &'a GraphDiff>) -> Self {
        let mut map = Self::new();
        for diff in diffs {
            if let GraphDiff::NodeIdChanged { node_id, new_id } = diff {
                map.insert(node_id.clone(), new_id.clone());
            }
        }
        map
    }
}
