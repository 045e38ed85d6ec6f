//! Entity metadata consumed by the change-tracking core.
//!
//! Metadata is the source of truth for which properties exist: graph events
//! naming undeclared properties are ignored by the classifier, and ignore
//! lists naming undeclared properties are rejected by the change filter.

use crate::errors::{CommitLogError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// A declared scalar attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    /// Stored column is `NOT NULL`
    pub mandatory: bool,
}

impl AttributeDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mandatory: false,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    ToOne,
    ToMany,
}

/// What happens to related objects when the owner is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteRule {
    /// Unset the relationship on both ends
    #[default]
    Nullify,
    /// Delete the related objects too
    Cascade,
    /// Refuse the delete while related objects exist
    Deny,
}

/// Join table backing a flattened many-to-many relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub name: String,
    /// Column holding the key of the relationship's source entity
    pub source_column: String,
    /// Column holding the key of the relationship's target entity
    pub target_column: String,
}

impl JoinTable {
    pub fn new(name: &str, source_column: &str, target_column: &str) -> Self {
        Self {
            name: name.to_string(),
            source_column: source_column.to_string(),
            target_column: target_column.to_string(),
        }
    }

    /// Same table seen from the other side
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            source_column: self.target_column.clone(),
            target_column: self.source_column.clone(),
        }
    }
}

/// A declared relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub target_entity: String,
    pub kind: RelationshipKind,
    /// Name of the inverse relationship on the target entity
    pub reverse: Option<String>,
    pub flattened_through: Option<JoinTable>,
    pub delete_rule: DeleteRule,
}

impl RelationshipDescriptor {
    pub fn to_one(name: &str, target_entity: &str) -> Self {
        Self {
            name: name.to_string(),
            target_entity: target_entity.to_string(),
            kind: RelationshipKind::ToOne,
            reverse: None,
            flattened_through: None,
            delete_rule: DeleteRule::Nullify,
        }
    }

    pub fn to_many(name: &str, target_entity: &str) -> Self {
        Self {
            kind: RelationshipKind::ToMany,
            ..Self::to_one(name, target_entity)
        }
    }

    /// Flattened many-to-many through `join`
    pub fn flattened(name: &str, target_entity: &str, join: JoinTable) -> Self {
        Self {
            flattened_through: Some(join),
            ..Self::to_many(name, target_entity)
        }
    }

    pub fn with_reverse(mut self, reverse: &str) -> Self {
        self.reverse = Some(reverse.to_string());
        self
    }

    pub fn with_delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }

    pub fn is_to_many(&self) -> bool {
        self.kind == RelationshipKind::ToMany
    }

    pub fn is_flattened(&self) -> bool {
        self.flattened_through.is_some()
    }

    /// Foreign key column of a to-one relationship
    pub fn fk_column(&self) -> String {
        format!("{}_id", self.name)
    }
}

/// Audit participation marker for an entity.
///
/// Entities carrying this marker always take part in change capture. The
/// ignore flags and lists apply in every filter mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitLogAnnotation {
    /// Attribute or relationship names excluded from capture
    pub ignored_properties: BTreeSet<String>,
    pub ignore_attributes: bool,
    pub ignore_to_one_relationships: bool,
    pub ignore_to_many_relationships: bool,
    /// Attributes whose values are recorded masked
    pub confidential: BTreeSet<String>,
}

impl CommitLogAnnotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignored_properties(mut self, names: &[&str]) -> Self {
        self.ignored_properties
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn ignore_attributes(mut self) -> Self {
        self.ignore_attributes = true;
        self
    }

    pub fn ignore_to_one_relationships(mut self) -> Self {
        self.ignore_to_one_relationships = true;
        self
    }

    pub fn ignore_to_many_relationships(mut self) -> Self {
        self.ignore_to_many_relationships = true;
        self
    }

    pub fn confidential(mut self, names: &[&str]) -> Self {
        self.confidential.extend(names.iter().map(|n| n.to_string()));
        self
    }
}

/// One mapped entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: String,
    pub pk_column: String,
    pub attributes: Vec<AttributeDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
    pub commit_log: Option<CommitLogAnnotation>,
}

impl EntityDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pk_column: "ID".to_string(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            commit_log: None,
        }
    }

    pub fn with_pk_column(mut self, column: &str) -> Self {
        self.pk_column = column.to_string();
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_commit_log(mut self, annotation: CommitLogAnnotation) -> Self {
        self.commit_log = Some(annotation);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Attribute lookup failing with `UnknownAttribute`
    pub fn require_attribute(&self, name: &str) -> Result<&AttributeDescriptor> {
        self.attribute(name)
            .ok_or_else(|| CommitLogError::UnknownAttribute {
                entity: self.name.clone(),
                attribute: name.to_string(),
            })
    }

    /// Relationship lookup failing with `UnknownRelationship`
    pub fn require_relationship(&self, name: &str) -> Result<&RelationshipDescriptor> {
        self.relationship(name)
            .ok_or_else(|| CommitLogError::UnknownRelationship {
                entity: self.name.clone(),
                relationship: name.to_string(),
            })
    }

    pub fn is_audited(&self) -> bool {
        self.commit_log.is_some()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn to_one_relationships(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.relationships.iter().filter(|r| !r.is_to_many())
    }

    pub fn to_many_relationships(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.relationships.iter().filter(|r| r.is_to_many())
    }
}

/// Registry of all mapped entities
#[derive(Debug, Clone, Default)]
pub struct EntityResolver {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, replacing any previous one with the same name
    pub fn with_entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor> {
        self.entities
            .get(name)
            .ok_or_else(|| CommitLogError::UnknownEntity {
                entity: name.to_string(),
            })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    /// Relationship on the other side of `relationship`, if declared
    pub fn reverse_of(
        &self,
        relationship: &RelationshipDescriptor,
    ) -> Result<Option<&RelationshipDescriptor>> {
        match &relationship.reverse {
            None => Ok(None),
            Some(reverse) => {
                let target = self.entity(&relationship.target_entity)?;
                target.require_relationship(reverse).map(Some)
            }
        }
    }

    /// Check cross-entity consistency of the whole model
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` for duplicate property names, dangling
    /// targets or reverses, and relationship shapes the store cannot map.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            let mut seen = BTreeSet::new();
            let names = entity
                .attributes
                .iter()
                .map(|a| a.name.as_str())
                .chain(entity.relationships.iter().map(|r| r.name.as_str()));
            for name in names {
                if !seen.insert(name) {
                    return Err(invalid(entity, format!("duplicate property {}", name)));
                }
            }

            for rel in &entity.relationships {
                let target = self.entities.get(&rel.target_entity).ok_or_else(|| {
                    invalid(
                        entity,
                        format!("{} targets unknown entity {}", rel.name, rel.target_entity),
                    )
                })?;
                let reverse = match &rel.reverse {
                    Some(name) => Some(target.relationship(name).ok_or_else(|| {
                        invalid(
                            entity,
                            format!("reverse {} of {} is not declared", name, rel.name),
                        )
                    })?),
                    None => None,
                };

                match (rel.kind, &rel.flattened_through, reverse) {
                    (RelationshipKind::ToOne, Some(_), _) => {
                        return Err(invalid(
                            entity,
                            format!("to-one {} cannot be flattened", rel.name),
                        ));
                    }
                    (RelationshipKind::ToOne, None, Some(rev)) if !rev.is_to_many() || rev.is_flattened() => {
                        return Err(invalid(
                            entity,
                            format!("reverse of to-one {} must be a direct to-many", rel.name),
                        ));
                    }
                    (RelationshipKind::ToMany, None, rev) => {
                        let ok = rev.map(|r| r.kind == RelationshipKind::ToOne).unwrap_or(false);
                        if !ok {
                            return Err(invalid(
                                entity,
                                format!("to-many {} needs a reverse to-one", rel.name),
                            ));
                        }
                    }
                    (RelationshipKind::ToMany, Some(join), Some(rev)) => {
                        if rev.flattened_through.as_ref() != Some(&join.reversed()) {
                            return Err(invalid(
                                entity,
                                format!(
                                    "reverse of flattened {} must use the same join table",
                                    rel.name
                                ),
                            ));
                        }
                    }
                    _ => {}
                }

                if let Some(rev) = reverse {
                    if rev.reverse.as_deref() != Some(rel.name.as_str()) {
                        return Err(invalid(
                            entity,
                            format!("reverse {} does not point back to {}", rev.name, rel.name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid(entity: &EntityDescriptor, reason: String) -> CommitLogError {
    CommitLogError::InvalidMetadata {
        entity: entity.name.clone(),
        reason,
    }
}
