//! Field definitions for entities.

use super::types::{DefaultValue, ScalarType};
use serde::{Deserialize, Serialize};

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name as seen on instances.
    pub name: String,
    /// Field data type.
    pub field_type: ScalarType,
    /// Whether the field may hold null.
    #[serde(default)]
    pub nullable: bool,
    /// Whether this field is the entity's primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the backend assigns the value on insert.
    #[serde(default)]
    pub autoincrement: bool,
    /// Column name in the backend, when it differs from the field name.
    #[serde(default)]
    pub alias: Option<String>,
    /// Default value if not provided.
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl FieldDef {
    /// Create a new non-nullable field.
    pub fn new(name: impl Into<String>, field_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            primary_key: false,
            autoincrement: false,
            alias: None,
            default: None,
        }
    }

    /// Create a nullable field.
    pub fn optional(name: impl Into<String>, field_type: ScalarType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, field_type)
        }
    }

    /// Create a primary key field.
    ///
    /// Integer keys are auto-increment by default.
    pub fn primary_key(name: impl Into<String>, field_type: ScalarType) -> Self {
        Self {
            primary_key: true,
            autoincrement: field_type.is_integer(),
            ..Self::new(name, field_type)
        }
    }

    /// Set the backend column name.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Turn auto-increment off (or on).
    pub fn with_autoincrement(mut self, autoincrement: bool) -> Self {
        self.autoincrement = autoincrement;
        self
    }

    /// Column name used by the backend.
    pub fn column(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builders() {
        let name = FieldDef::new("name", ScalarType::String);
        assert!(!name.nullable);
        assert!(!name.primary_key);
        assert_eq!(name.column(), "name");

        let rating = FieldDef::optional("rating", ScalarType::Float64).with_alias("score");
        assert!(rating.nullable);
        assert_eq!(rating.column(), "score");
    }

    #[test]
    fn test_integer_primary_key_autoincrements() {
        let id = FieldDef::primary_key("id", ScalarType::Int64);
        assert!(id.primary_key);
        assert!(id.autoincrement);

        let code = FieldDef::primary_key("code", ScalarType::String);
        assert!(!code.autoincrement);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let field: FieldDef =
            serde_json::from_str(r#"{"name":"title","field_type":"string","nullable":true}"#)
                .unwrap();
        assert_eq!(field, FieldDef::optional("title", ScalarType::String));
    }
}
