//! Relationship diffing: to-one old/new targets and to-many added/removed
//! sets with net-zero cancellation.

use crate::errors::Result;
use crate::metadata::{EntityResolver, RelationshipKind};
use crate::model::{
    ObjectChange, ObjectChangeType, ObjectId, ToManyRelationshipChange, ToOneRelationshipChange,
};
use std::collections::BTreeSet;

impl ToManyRelationshipChange {
    /// Record `id` as added; cancels a pending removal of the same id
    pub fn record_added(&mut self, id: ObjectId) {
        if !self.removed.remove(&id) {
            self.added.insert(id);
        }
    }

    /// Record `id` as removed; cancels a pending addition of the same id
    pub fn record_removed(&mut self, id: ObjectId) {
        if !self.added.remove(&id) {
            self.removed.insert(id);
        }
    }

    /// Apply a later observation on top of this one
    pub fn superimpose(&mut self, later: ToManyRelationshipChange) {
        for id in later.removed {
            self.record_removed(id);
        }
        for id in later.added {
            self.record_added(id);
        }
    }

    /// Rewrite every member id
    pub fn map_ids(&mut self, f: impl Fn(&ObjectId) -> ObjectId) {
        self.added = self.added.iter().map(&f).collect();
        self.removed = self.removed.iter().map(&f).collect();
    }
}

impl ToOneRelationshipChange {
    /// Keep the earliest old target, take the latest new target
    pub fn superimpose(&mut self, later: ToOneRelationshipChange) {
        self.new = later.new;
    }
}

/// To-one change between two targets, `None` when they are equal
pub fn diff_to_one(
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
) -> Option<ToOneRelationshipChange> {
    if old == new {
        None
    } else {
        Some(ToOneRelationshipChange::new(old.cloned(), new.cloned()))
    }
}

/// Membership difference between a pre and post member set
pub fn diff_to_many(pre: &BTreeSet<ObjectId>, post: &BTreeSet<ObjectId>) -> ToManyRelationshipChange {
    ToManyRelationshipChange {
        added: post.difference(pre).cloned().collect(),
        removed: pre.difference(post).cloned().collect(),
    }
}

/// Translate an arc event into an UPDATE fragment for `node_id`.
///
/// Arcs on relationships the entity does not declare yield `None`.
pub fn arc_fragment(
    resolver: &EntityResolver,
    node_id: &ObjectId,
    target_id: &ObjectId,
    arc: &str,
    created: bool,
) -> Result<Option<ObjectChange>> {
    let entity = resolver.entity(node_id.entity_name())?;
    let Some(relationship) = entity.relationship(arc) else {
        tracing::debug!(
            entity = entity.name.as_str(),
            arc,
            "ignoring arc on undeclared relationship"
        );
        return Ok(None);
    };

    let (before, after) = if created {
        (None, Some(target_id))
    } else {
        (Some(target_id), None)
    };

    let mut fragment = ObjectChange::new(ObjectChangeType::Update, node_id.clone());
    match relationship.kind {
        RelationshipKind::ToOne => {
            if let Some(change) = diff_to_one(before, after) {
                fragment
                    .to_one_relationship_changes
                    .insert(arc.to_string(), change);
            }
        }
        RelationshipKind::ToMany => {
            let pre: BTreeSet<ObjectId> = before.into_iter().cloned().collect();
            let post: BTreeSet<ObjectId> = after.into_iter().cloned().collect();
            fragment
                .to_many_relationship_changes
                .insert(arc.to_string(), diff_to_many(&pre, &post));
        }
    }
    Ok(Some(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityDescriptor, RelationshipDescriptor};

    fn child(n: i64) -> ObjectId {
        ObjectId::of("AuditableChild1", "ID", n)
    }

    fn resolver() -> EntityResolver {
        EntityResolver::new()
            .with_entity(EntityDescriptor::new("Auditable1").with_relationship(
                RelationshipDescriptor::to_many("children1", "AuditableChild1")
                    .with_reverse("parent"),
            ))
            .with_entity(EntityDescriptor::new("AuditableChild1").with_relationship(
                RelationshipDescriptor::to_one("parent", "Auditable1").with_reverse("children1"),
            ))
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let mut change = ToManyRelationshipChange::new();
        change.record_added(child(1));
        change.record_removed(child(1));
        assert!(change.is_empty());
    }

    #[test]
    fn test_remove_then_add_cancels() {
        let mut change = ToManyRelationshipChange::new();
        change.record_removed(child(1));
        change.record_added(child(1));
        change.record_added(child(2));
        assert!(change.removed.is_empty());
        assert_eq!(change.added.len(), 1);
        assert!(change.added.contains(&child(2)));
    }

    #[test]
    fn test_superimpose_to_one_keeps_first_old() {
        let a1 = ObjectId::of("Auditable1", "ID", 1);
        let a2 = ObjectId::of("Auditable1", "ID", 2);
        let mut first = ToOneRelationshipChange::new(Some(a2.clone()), None);
        first.superimpose(ToOneRelationshipChange::new(None, Some(a1.clone())));
        assert_eq!(first, ToOneRelationshipChange::new(Some(a2), Some(a1)));
    }

    #[test]
    fn test_diff_to_many() {
        let pre: BTreeSet<_> = [child(1), child(2)].into_iter().collect();
        let post: BTreeSet<_> = [child(2), child(3)].into_iter().collect();
        let change = diff_to_many(&pre, &post);
        assert_eq!(change.added, [child(3)].into_iter().collect());
        assert_eq!(change.removed, [child(1)].into_iter().collect());
    }

    #[test]
    fn test_diff_to_one_equal_is_none() {
        let a1 = ObjectId::of("Auditable1", "ID", 1);
        assert!(diff_to_one(Some(&a1), Some(&a1)).is_none());
        assert!(diff_to_one(None, Some(&a1)).is_some());
    }

    #[test]
    fn test_arc_fragment_to_one_and_to_many() {
        let resolver = resolver();
        let a1 = ObjectId::of("Auditable1", "ID", 1);

        let parent_side = arc_fragment(&resolver, &a1, &child(1), "children1", true)
            .unwrap()
            .unwrap();
        assert_eq!(parent_side.change_type, ObjectChangeType::Update);
        assert!(parent_side.to_many("children1").unwrap().added.contains(&child(1)));

        let child_side = arc_fragment(&resolver, &child(1), &a1, "parent", false)
            .unwrap()
            .unwrap();
        assert_eq!(
            child_side.to_one("parent"),
            Some(&ToOneRelationshipChange::new(Some(a1), None))
        );
    }

    #[test]
    fn test_arc_on_undeclared_relationship_ignored() {
        let a1 = ObjectId::of("Auditable1", "ID", 1);
        let fragment = arc_fragment(&resolver(), &a1, &child(1), "nope", true).unwrap();
        assert!(fragment.is_none());
    }
}
