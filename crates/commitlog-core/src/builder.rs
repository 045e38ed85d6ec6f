//! ChangeMap construction for one commit:
//! classify → filter → aggregate → finish → redact.

use crate::change_map::{ChangeMap, ChangeMapAggregator};
use crate::classify::classify;
use crate::errors::Result;
use crate::filter::ChangeFilter;
use crate::graph::{GraphDiff, IdMap};
use crate::metadata::EntityResolver;
use crate::snapshot::SnapshotSource;

/// Build the ChangeMap for a flushed commit.
///
/// `diffs` is the complete event sequence of the commit, including the
/// `NodeIdChanged` events that carry permanent ids for inserted objects.
///
/// # Errors
///
/// `UnknownEntity` for events on unmapped entities and
/// `FilterMisconfigured` for ignore lists naming undeclared properties.
pub fn build_change_map(
    diffs: &[GraphDiff],
    resolver: &EntityResolver,
    filter: &mut ChangeFilter<'_>,
    snapshots: &dyn SnapshotSource,
) -> Result<ChangeMap> {
    let id_map = IdMap::from_diffs(diffs);
    let mut aggregator = ChangeMapAggregator::new();

    for diff in diffs {
        let Some(fragment) = classify(diff, resolver, snapshots)? else {
            continue;
        };
        if let Some(admitted) = filter.admit(fragment)? {
            aggregator.put(admitted);
        }
    }

    let mut changes = aggregator.finish(&id_map);
    for change in &mut changes {
        filter.redact(change)?;
    }
    Ok(ChangeMap::from_unique(changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterConfig;
    use crate::metadata::{
        AttributeDescriptor, CommitLogAnnotation, EntityDescriptor, RelationshipDescriptor,
    };
    use crate::model::{ObjectChangeType, ObjectId};
    use crate::snapshot::Snapshot;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Snapshots {
        committed: HashMap<ObjectId, Snapshot>,
        current: HashMap<ObjectId, Snapshot>,
    }

    impl SnapshotSource for Snapshots {
        fn committed_snapshot(&self, id: &ObjectId) -> Option<Snapshot> {
            self.committed.get(id).cloned()
        }
        fn current_snapshot(&self, id: &ObjectId) -> Option<Snapshot> {
            self.current.get(id).cloned()
        }
    }

    fn resolver() -> EntityResolver {
        EntityResolver::new()
            .with_entity(
                EntityDescriptor::new("Auditable1")
                    .with_attribute(AttributeDescriptor::new("charProperty1"))
                    .with_relationship(
                        RelationshipDescriptor::to_many("children1", "AuditableChild1")
                            .with_reverse("parent"),
                    )
                    .with_commit_log(CommitLogAnnotation::new()),
            )
            .with_entity(
                EntityDescriptor::new("AuditableChild1")
                    .with_attribute(AttributeDescriptor::new("charProperty1"))
                    .with_relationship(
                        RelationshipDescriptor::to_one("parent", "Auditable1")
                            .with_reverse("children1"),
                    )
                    .with_commit_log(CommitLogAnnotation::new()),
            )
            .with_entity(
                EntityDescriptor::new("Auditable3")
                    .with_attribute(AttributeDescriptor::new("charProperty1")),
            )
    }

    fn attrs(value: Value) -> Snapshot {
        let mut s = Snapshot::new();
        s.attributes.insert("charProperty1".to_string(), value);
        s
    }

    #[test]
    fn test_insert_with_permanent_id() {
        let temp = ObjectId::temporary("Auditable1");
        let perm = ObjectId::of("Auditable1", "ID", 1);
        let mut snapshots = Snapshots::default();
        snapshots.current.insert(temp.clone(), attrs(json!("yy")));

        let diffs = vec![
            GraphDiff::NodeCreated {
                node_id: temp.clone(),
            },
            GraphDiff::PropertyChanged {
                node_id: temp.clone(),
                property: "charProperty1".to_string(),
                old: Value::Null,
                new: json!("yy"),
            },
            GraphDiff::NodeIdChanged {
                node_id: temp.clone(),
                new_id: perm.clone(),
            },
        ];

        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);
        let map = build_change_map(&diffs, &resolver, &mut filter, &snapshots).unwrap();

        assert_eq!(map.key_count(), 2);
        assert_eq!(map.unique_changes().len(), 1);
        let change = map.get(&perm).unwrap();
        assert_eq!(change.change_type, ObjectChangeType::Insert);
        assert_eq!(change.pre_commit_id, temp);
        assert_eq!(change.attribute("charProperty1").unwrap().new, json!("yy"));
    }

    #[test]
    fn test_reparent_produces_changes_on_both_sides() {
        let a1 = ObjectId::of("Auditable1", "ID", 1);
        let ac1 = ObjectId::of("AuditableChild1", "ID", 1);
        let diffs = vec![
            GraphDiff::ArcDeleted {
                node_id: ac1.clone(),
                target_id: a1.clone(),
                arc: "parent".to_string(),
            },
            GraphDiff::ArcDeleted {
                node_id: a1.clone(),
                target_id: ac1.clone(),
                arc: "children1".to_string(),
            },
        ];

        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);
        let map =
            build_change_map(&diffs, &resolver, &mut filter, &Snapshots::default()).unwrap();

        assert_eq!(map.unique_changes().len(), 2);
        assert!(map.get(&a1).unwrap().to_many("children1").unwrap().removed.contains(&ac1));
        assert_eq!(map.get(&ac1).unwrap().to_one("parent").unwrap().old, Some(a1));
    }

    #[test]
    fn test_key_change_resolves_references() {
        let a1 = ObjectId::of("Auditable1", "ID", 1);
        let ac1 = ObjectId::of("AuditableChild1", "ID", 1);
        let moved = ObjectId::of("AuditableChild1", "ID", 10);
        let diffs = vec![
            GraphDiff::PropertyChanged {
                node_id: ac1.clone(),
                property: "charProperty1".to_string(),
                old: json!("c1"),
                new: json!("c1b"),
            },
            GraphDiff::NodeIdChanged {
                node_id: ac1.clone(),
                new_id: moved.clone(),
            },
            GraphDiff::ArcDeleted {
                node_id: a1.clone(),
                target_id: ac1.clone(),
                arc: "children1".to_string(),
            },
        ];

        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);
        let map =
            build_change_map(&diffs, &resolver, &mut filter, &Snapshots::default()).unwrap();

        assert_eq!(map.unique_changes().len(), 2);
        let child = map.get(&ac1).unwrap();
        assert_eq!(child.change_type, ObjectChangeType::Update);
        assert_eq!(child.post_commit_id, moved);
        assert_eq!(child.attribute("charProperty1").unwrap().new, json!("c1b"));
        assert_eq!(map.get(&moved), Some(child));
        assert!(map.get(&a1).unwrap().to_many("children1").unwrap().removed.contains(&moved));
    }

    #[test]
    fn test_annotation_mode_drops_unannotated_entity() {
        let a3 = ObjectId::of("Auditable3", "ID", 1);
        let diffs = vec![GraphDiff::PropertyChanged {
            node_id: a3.clone(),
            property: "charProperty1".to_string(),
            old: json!("a"),
            new: json!("b"),
        }];

        let resolver = resolver();
        let config = FilterConfig::new().annotated_entities_only();
        let mut filter = ChangeFilter::new(&resolver, &config);
        let map =
            build_change_map(&diffs, &resolver, &mut filter, &Snapshots::default()).unwrap();

        assert!(map.get(&a3).is_none());
        assert!(map.is_empty());
    }
}
