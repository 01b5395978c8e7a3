//! Relation definitions between entities.

use serde::{Deserialize, Serialize};

/// Kind of a relation, seen from its source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The source holds a foreign key to the target (to-one).
    ForeignKey,
    /// The target holds a foreign key to the source (to-many).
    ReverseForeignKey,
    /// Source and target are linked through a third entity (to-many).
    ManyToMany,
}

/// Link entity of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughDef {
    /// Name of the through entity.
    pub entity: String,
    /// Field on the through entity pointing at the relation's source.
    #[serde(default)]
    pub source_field: String,
    /// Field on the through entity pointing at the relation's target.
    #[serde(default)]
    pub target_field: String,
}

impl ThroughDef {
    /// Reference a through entity; link fields are bound when the registry is built.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            source_field: String::new(),
            target_field: String::new(),
        }
    }

    /// Set the link field names explicitly.
    pub fn with_fields(
        mut self,
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        self.source_field = source_field.into();
        self.target_field = target_field.into();
        self
    }

    /// The same link traversed in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            source_field: self.target_field.clone(),
            target_field: self.source_field.clone(),
        }
    }
}

/// A relation from one entity to another.
///
/// `local_field` and `remote_field` name the fields compared when the
/// relation is traversed: for a foreign key the key field on the source and
/// the target's primary key; for a reverse foreign key the source's primary
/// key and the key field on the target; for many-to-many the primary keys of
/// both ends, matched through [`ThroughDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name, unique among the source entity's relations.
    pub name: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Target entity name.
    pub target: String,
    /// Whether the source may exist without a target.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Field on the source entity used for matching.
    #[serde(default)]
    pub local_field: String,
    /// Field on the target entity used for matching.
    #[serde(default)]
    pub remote_field: String,
    /// Link entity for many-to-many relations.
    #[serde(default)]
    pub through: Option<ThroughDef>,
    /// Name of the reverse relation registered on the target.
    #[serde(default)]
    pub related_name: Option<String>,
    /// Whether source and target are the same entity.
    #[serde(default)]
    pub self_reference: bool,
    /// Whether the registry derived this relation from another one.
    #[serde(default)]
    pub reverse_of: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl RelationDef {
    fn base(name: String, kind: RelationKind, target: String) -> Self {
        Self {
            name,
            kind,
            target,
            nullable: true,
            local_field: String::new(),
            remote_field: String::new(),
            through: None,
            related_name: None,
            self_reference: false,
            reverse_of: None,
        }
    }

    /// Declare a nullable foreign key.
    ///
    /// The key field defaults to `<name>_id` and is created on the source
    /// entity if it was not declared.
    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::base(name.into(), RelationKind::ForeignKey, target.into())
    }

    /// Declare a many-to-many relation.
    ///
    /// The through entity defaults to `<Source><Target>` and is synthesised if
    /// it was not declared.
    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::base(name.into(), RelationKind::ManyToMany, target.into())
    }

    /// Mark the relation as required (non-nullable foreign key).
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Name the key field on the source entity.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.local_field = field.into();
        self
    }

    /// Name the reverse relation on the target.
    pub fn with_related_name(mut self, related_name: impl Into<String>) -> Self {
        self.related_name = Some(related_name.into());
        self
    }

    /// Set the through entity of a many-to-many relation.
    pub fn through(mut self, through: ThroughDef) -> Self {
        self.through = Some(through);
        self
    }

    /// Whether traversal yields a sequence of targets.
    pub fn is_to_many(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::ReverseForeignKey | RelationKind::ManyToMany
        )
    }

    /// Whether every source row must have a target row.
    pub fn is_required(&self) -> bool {
        self.kind == RelationKind::ForeignKey && !self.nullable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_key_builder() {
        let rel = RelationDef::foreign_key("category", "Category")
            .required()
            .with_field("category_id")
            .with_related_name("courses");

        assert_eq!(rel.kind, RelationKind::ForeignKey);
        assert!(rel.is_required());
        assert!(!rel.is_to_many());
        assert_eq!(rel.local_field, "category_id");
        assert_eq!(rel.related_name.as_deref(), Some("courses"));
    }

    #[test]
    fn test_many_to_many_is_to_many_and_never_required() {
        let rel = RelationDef::many_to_many("students", "Student").required();
        assert!(rel.is_to_many());
        assert!(!rel.is_required());
    }

    #[test]
    fn test_through_reversed() {
        let through = ThroughDef::new("Enrollment").with_fields("course", "student");
        let back = through.reversed();
        assert_eq!(back.source_field, "student");
        assert_eq!(back.target_field, "course");
    }

    #[test]
    fn test_deserialize_defaults_to_nullable() {
        let rel: RelationDef = serde_json::from_str(
            r#"{"name":"category","kind":"foreign_key","target":"Category"}"#,
        )
        .unwrap();
        assert!(rel.nullable);
        assert!(rel.through.is_none());
    }
}
