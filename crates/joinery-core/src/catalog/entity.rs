//! Entity definitions.

use super::field::FieldDef;
use super::relation::RelationDef;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the registry).
    pub name: String,
    /// Backend table name. Defaults to the lower-cased name plus `s`.
    #[serde(default)]
    pub table: Option<String>,
    /// Name of the primary key field, bound when the registry is built.
    #[serde(default)]
    pub primary_key: String,
    /// Field definitions, in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Relation definitions.
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: String::new(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Set the backend table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Backend table name.
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| format!("{}s", self.name.to_lowercase()))
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get a field by name, failing with [`Error::UnknownField`].
    pub fn field(&self, name: &str) -> Result<&FieldDef, Error> {
        self.get_field(name).ok_or_else(|| Error::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Backend column of a field.
    pub fn column_of(&self, name: &str) -> Result<&str, Error> {
        self.field(name).map(FieldDef::column)
    }

    /// Get the primary key field definition.
    pub fn primary_key_field(&self) -> Result<&FieldDef, Error> {
        self.field(&self.primary_key)
    }

    /// Get a relation by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Relations every row must satisfy.
    pub fn required_relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.iter().filter(|r| r.is_required())
    }

    /// Relations leading to the given entity.
    pub fn relations_to<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a RelationDef> {
        self.relations.iter().filter(move |r| r.target == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("Course")
            .with_field(FieldDef::primary_key("id", ScalarType::Int64))
            .with_field(FieldDef::new("name", ScalarType::String))
            .with_field(FieldDef::optional("rating", ScalarType::Float64).with_alias("score"))
            .with_relation(RelationDef::foreign_key("category", "Category"));

        assert_eq!(entity.name, "Course");
        assert_eq!(entity.table_name(), "courses");
        assert_eq!(entity.fields.len(), 3);
        assert!(entity.get_relation("category").is_some());
        assert_eq!(entity.column_of("rating").unwrap(), "score");
    }

    #[test]
    fn test_explicit_table() {
        let entity = EntityDef::new("Person").with_table("people");
        assert_eq!(entity.table_name(), "people");
    }

    #[test]
    fn test_unknown_field() {
        let entity = EntityDef::new("Course");
        assert!(matches!(
            entity.field("missing"),
            Err(Error::UnknownField { .. })
        ));
    }
}
