//! Change filter: entity participation, ignored properties and
//! confidential masking.
//!
//! Policy is resolved per entity the first time a commit touches it and
//! memoized for the rest of that commit.

use crate::errors::{CommitLogError, Result};
use crate::metadata::{EntityDescriptor, EntityResolver, RelationshipKind};
use crate::model::{ObjectChange, ObjectChangeType};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Mask recorded in place of confidential attribute values
pub const CONFIDENTIAL_MASK: &str = "*******";

/// Filter options fixed at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Only entities carrying a `CommitLogAnnotation` participate
    pub annotated_entities_only: bool,
    pub ignored_attributes: BTreeMap<String, BTreeSet<String>>,
    pub ignored_relationships: BTreeMap<String, BTreeSet<String>>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotated_entities_only(mut self) -> Self {
        self.annotated_entities_only = true;
        self
    }

    pub fn ignore_attributes(mut self, entity: &str, names: &[&str]) -> Self {
        self.ignored_attributes
            .entry(entity.to_string())
            .or_default()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn ignore_relationships(mut self, entity: &str, names: &[&str]) -> Self {
        self.ignored_relationships
            .entry(entity.to_string())
            .or_default()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Combine two configurations; flags are or-ed, ignore lists unioned
    pub fn merge(mut self, other: FilterConfig) -> Self {
        self.annotated_entities_only |= other.annotated_entities_only;
        for (entity, names) in other.ignored_attributes {
            self.ignored_attributes.entry(entity).or_default().extend(names);
        }
        for (entity, names) in other.ignored_relationships {
            self.ignored_relationships
                .entry(entity)
                .or_default()
                .extend(names);
        }
        self
    }
}

/// Resolved policy for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPolicy {
    pub participates: bool,
    pub ignore_all_attributes: bool,
    pub ignore_all_to_one: bool,
    pub ignore_all_to_many: bool,
    pub ignored_attributes: BTreeSet<String>,
    pub ignored_relationships: BTreeSet<String>,
    pub confidential: BTreeSet<String>,
}

impl EntityPolicy {
    fn resolve(entity: &EntityDescriptor, config: &FilterConfig) -> Result<Self> {
        let annotation = entity.commit_log.as_ref();
        let mut policy = EntityPolicy {
            participates: annotation.is_some() || !config.annotated_entities_only,
            ..Self::default()
        };
        if !policy.participates {
            return Ok(policy);
        }

        if let Some(annotation) = annotation {
            policy.ignore_all_attributes = annotation.ignore_attributes;
            policy.ignore_all_to_one = annotation.ignore_to_one_relationships;
            policy.ignore_all_to_many = annotation.ignore_to_many_relationships;
            for name in &annotation.ignored_properties {
                if entity.attribute(name).is_some() {
                    policy.ignored_attributes.insert(name.clone());
                } else if entity.relationship(name).is_some() {
                    policy.ignored_relationships.insert(name.clone());
                } else {
                    return Err(misconfigured(entity, "property", name));
                }
            }
            for name in &annotation.confidential {
                if entity.attribute(name).is_none() {
                    return Err(misconfigured(entity, "confidential attribute", name));
                }
                policy.confidential.insert(name.clone());
            }
        }

        if let Some(names) = config.ignored_attributes.get(&entity.name) {
            for name in names {
                if entity.attribute(name).is_none() {
                    return Err(misconfigured(entity, "attribute", name));
                }
                policy.ignored_attributes.insert(name.clone());
            }
        }
        if let Some(names) = config.ignored_relationships.get(&entity.name) {
            for name in names {
                if entity.relationship(name).is_none() {
                    return Err(misconfigured(entity, "relationship", name));
                }
                policy.ignored_relationships.insert(name.clone());
            }
        }

        // Relationship-wide flags are expanded to names so stripping needs
        // no metadata lookups.
        for rel in &entity.relationships {
            let ignored = match rel.kind {
                RelationshipKind::ToOne => policy.ignore_all_to_one,
                RelationshipKind::ToMany => policy.ignore_all_to_many,
            };
            if ignored {
                policy.ignored_relationships.insert(rel.name.clone());
            }
        }
        Ok(policy)
    }

    fn keeps_attribute(&self, name: &str) -> bool {
        !self.ignore_all_attributes && !self.ignored_attributes.contains(name)
    }

    fn keeps_relationship(&self, name: &str) -> bool {
        !self.ignored_relationships.contains(name)
    }
}

fn misconfigured(entity: &EntityDescriptor, kind: &str, name: &str) -> CommitLogError {
    CommitLogError::FilterMisconfigured {
        entity: entity.name.clone(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Commit-scoped filter over change fragments
pub struct ChangeFilter<'a> {
    resolver: &'a EntityResolver,
    config: &'a FilterConfig,
    policies: HashMap<String, EntityPolicy>,
}

impl<'a> ChangeFilter<'a> {
    pub fn new(resolver: &'a EntityResolver, config: &'a FilterConfig) -> Self {
        Self {
            resolver,
            config,
            policies: HashMap::new(),
        }
    }

    /// Policy for `entity`, resolved on first use
    ///
    /// # Errors
    ///
    /// `FilterMisconfigured` when an ignore list or confidential list names
    /// a property the entity does not declare.
    pub fn policy(&mut self, entity: &str) -> Result<&EntityPolicy> {
        if !self.policies.contains_key(entity) {
            let descriptor = self.resolver.entity(entity)?;
            let policy = EntityPolicy::resolve(descriptor, self.config)?;
            self.policies.insert(entity.to_string(), policy);
        }
        self.policies
            .get(entity)
            .ok_or_else(|| CommitLogError::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    /// Decide whether a fragment enters aggregation, stripping ignored
    /// properties. Returns `None` for non-participating entities and for
    /// UPDATE fragments left with nothing to report.
    ///
    /// Empty INSERT and DELETE fragments still carry the object's change
    /// type into aggregation; [`ChangeMapAggregator::finish`] drops them if
    /// nothing else is reported for the object.
    ///
    /// [`ChangeMapAggregator::finish`]: crate::change_map::ChangeMapAggregator::finish
    pub fn admit(&mut self, mut fragment: ObjectChange) -> Result<Option<ObjectChange>> {
        let policy = self.policy(fragment.pre_commit_id.entity_name())?;
        if !policy.participates {
            return Ok(None);
        }

        fragment
            .attribute_changes
            .retain(|name, _| policy.keeps_attribute(name));
        fragment
            .to_one_relationship_changes
            .retain(|name, _| policy.keeps_relationship(name));
        fragment
            .to_many_relationship_changes
            .retain(|name, _| policy.keeps_relationship(name));

        let key_change = fragment.pre_commit_id != fragment.post_commit_id;
        if fragment.change_type == ObjectChangeType::Update
            && fragment.has_no_property_changes()
            && !key_change
        {
            return Ok(None);
        }
        Ok(Some(fragment))
    }

    /// Mask confidential attribute values in a finished change
    pub fn redact(&mut self, change: &mut ObjectChange) -> Result<()> {
        let policy = self.policy(change.pre_commit_id.entity_name())?;
        for (name, attribute) in change.attribute_changes.iter_mut() {
            if policy.confidential.contains(name) {
                mask(&mut attribute.old);
                mask(&mut attribute.new);
            }
        }
        Ok(())
    }
}

fn mask(value: &mut Value) {
    if !value.is_null() {
        *value = Value::String(CONFIDENTIAL_MASK.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        AttributeDescriptor, CommitLogAnnotation, EntityDescriptor, RelationshipDescriptor,
    };
    use crate::model::{AttributeChange, ObjectId, ToOneRelationshipChange};
    use serde_json::json;

    fn resolver() -> EntityResolver {
        EntityResolver::new()
            .with_entity(
                EntityDescriptor::new("Auditable2")
                    .with_attribute(AttributeDescriptor::new("charProperty1"))
                    .with_attribute(AttributeDescriptor::new("charProperty2"))
                    .with_relationship(RelationshipDescriptor::to_one("owner", "Auditable3"))
                    .with_commit_log(
                        CommitLogAnnotation::new()
                            .ignored_properties(&["charProperty1"])
                            .confidential(&["charProperty2"]),
                    ),
            )
            .with_entity(
                EntityDescriptor::new("Auditable3")
                    .with_attribute(AttributeDescriptor::new("charProperty1")),
            )
    }

    fn update(entity: &str) -> ObjectChange {
        let mut change = ObjectChange::new(ObjectChangeType::Update, ObjectId::of(entity, "ID", 1));
        change.attribute_changes.insert(
            "charProperty1".to_string(),
            AttributeChange::new(json!("a"), json!("b")),
        );
        change
    }

    #[test]
    fn test_unannotated_entity_excluded_in_annotation_mode() {
        let resolver = resolver();
        let config = FilterConfig::new().annotated_entities_only();
        let mut filter = ChangeFilter::new(&resolver, &config);

        assert!(filter.admit(update("Auditable3")).unwrap().is_none());
    }

    #[test]
    fn test_unannotated_entity_included_by_default() {
        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);

        assert!(filter.admit(update("Auditable3")).unwrap().is_some());
    }

    #[test]
    fn test_ignored_attribute_only_update_dropped() {
        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);

        assert!(filter.admit(update("Auditable2")).unwrap().is_none());
    }

    #[test]
    fn test_insert_survives_stripping() {
        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);

        let mut insert = update("Auditable2");
        insert.change_type = ObjectChangeType::Insert;
        let admitted = filter.admit(insert).unwrap().unwrap();
        assert!(admitted.attribute_changes.is_empty());
    }

    #[test]
    fn test_key_change_survives_stripping() {
        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);

        let mut moved = update("Auditable2");
        moved.post_commit_id = ObjectId::of("Auditable2", "ID", 9);
        let admitted = filter.admit(moved).unwrap().unwrap();
        assert!(admitted.has_no_property_changes());
    }

    #[test]
    fn test_config_ignored_relationship() {
        let resolver = resolver();
        let config = FilterConfig::new().ignore_relationships("Auditable2", &["owner"]);
        let mut filter = ChangeFilter::new(&resolver, &config);

        let mut change = ObjectChange::new(ObjectChangeType::Update, ObjectId::of("Auditable2", "ID", 1));
        change.to_one_relationship_changes.insert(
            "owner".to_string(),
            ToOneRelationshipChange::new(None, Some(ObjectId::of("Auditable3", "ID", 1))),
        );
        assert!(filter.admit(change).unwrap().is_none());
    }

    #[test]
    fn test_unknown_ignored_attribute_is_misconfiguration() {
        let resolver = resolver();
        let config = FilterConfig::new().ignore_attributes("Auditable3", &["nope"]);
        let mut filter = ChangeFilter::new(&resolver, &config);

        let err = filter.admit(update("Auditable3")).unwrap_err();
        assert!(matches!(err, CommitLogError::FilterMisconfigured { .. }));
    }

    #[test]
    fn test_confidential_values_masked() {
        let resolver = resolver();
        let config = FilterConfig::new();
        let mut filter = ChangeFilter::new(&resolver, &config);

        let mut change = ObjectChange::new(ObjectChangeType::Update, ObjectId::of("Auditable2", "ID", 1));
        change.attribute_changes.insert(
            "charProperty2".to_string(),
            AttributeChange::new(Value::Null, json!("secret")),
        );
        filter.redact(&mut change).unwrap();
        assert_eq!(
            change.attribute("charProperty2"),
            Some(&AttributeChange::new(Value::Null, json!(CONFIDENTIAL_MASK)))
        );
    }

    #[test]
    fn test_merge_configs() {
        let merged = FilterConfig::new()
            .ignore_attributes("A", &["x"])
            .merge(FilterConfig::new().annotated_entities_only().ignore_attributes("A", &["y"]));
        assert!(merged.annotated_entities_only);
        assert_eq!(merged.ignored_attributes["A"].len(), 2);
    }
}
