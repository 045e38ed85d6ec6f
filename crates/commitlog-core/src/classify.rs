//! Change classification: one graph event becomes at most one
//! `ObjectChange` fragment for the object it touches.

use crate::errors::Result;
use crate::graph::GraphDiff;
use crate::metadata::EntityResolver;
use crate::model::{AttributeChange, ObjectChange, ObjectChangeType};
use crate::relationship::arc_fragment;
use crate::snapshot::{SnapshotPair, SnapshotSource};

/// Classify one graph event.
///
/// - `NodeCreated` → INSERT carrying every non-null current attribute
/// - `NodeRemoved` → DELETE carrying every non-null committed attribute
/// - `PropertyChanged` → UPDATE for that attribute
/// - `ArcCreated`/`ArcDeleted` → UPDATE for that relationship
/// - `NodeIdChanged` of a permanent id → UPDATE moving the object to its
///   new key; temporary ids are translated at aggregation instead
///
/// Events naming undeclared properties yield `None`.
///
/// # Errors
///
/// `UnknownEntity` when the event's object belongs to no mapped entity.
pub fn classify(
    diff: &GraphDiff,
    resolver: &EntityResolver,
    snapshots: &dyn SnapshotSource,
) -> Result<Option<ObjectChange>> {
    match diff {
        GraphDiff::NodeCreated { node_id } => {
            let pair = SnapshotPair::new(
                node_id.clone(),
                None,
                Some(snapshots.current_snapshot(node_id).unwrap_or_default()),
            );
            from_pair(&pair, resolver)
        }
        GraphDiff::NodeRemoved { node_id } => {
            // an object never committed reads as all-null
            let pair = SnapshotPair::new(
                node_id.clone(),
                Some(snapshots.committed_snapshot(node_id).unwrap_or_default()),
                None,
            );
            from_pair(&pair, resolver)
        }
        GraphDiff::NodeIdChanged { node_id, new_id } => {
            if node_id.is_temporary() || node_id == new_id {
                return Ok(None);
            }
            resolver.entity(node_id.entity_name())?;
            let mut fragment = ObjectChange::new(ObjectChangeType::Update, node_id.clone());
            fragment.post_commit_id = new_id.clone();
            Ok(Some(fragment))
        }
        GraphDiff::PropertyChanged {
            node_id,
            property,
            old,
            new,
        } => {
            let entity = resolver.entity(node_id.entity_name())?;
            if entity.attribute(property).is_none() {
                tracing::debug!(
                    entity = entity.name.as_str(),
                    property = property.as_str(),
                    "ignoring change of undeclared attribute"
                );
                return Ok(None);
            }
            let mut fragment = ObjectChange::new(ObjectChangeType::Update, node_id.clone());
            fragment.attribute_changes.insert(
                property.clone(),
                AttributeChange::new(old.clone(), new.clone()),
            );
            Ok(Some(fragment))
        }
        GraphDiff::ArcCreated {
            node_id,
            target_id,
            arc,
        } => arc_fragment(resolver, node_id, target_id, arc, true),
        GraphDiff::ArcDeleted {
            node_id,
            target_id,
            arc,
        } => arc_fragment(resolver, node_id, target_id, arc, false),
    }
}

fn from_pair(pair: &SnapshotPair, resolver: &EntityResolver) -> Result<Option<ObjectChange>> {
    let Some(lifecycle) = pair.lifecycle() else {
        return Ok(None);
    };
    let entity = resolver.entity(pair.id.entity_name())?;
    let mut change = ObjectChange::new(lifecycle.change_type(), pair.id.clone());
    change.attribute_changes = pair.attribute_changes(entity.attribute_names());
    Ok(Some(change))
}
