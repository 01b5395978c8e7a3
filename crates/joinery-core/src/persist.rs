//! Row preparation for persistence.
//!
//! Turns field-level input (field names, related instances) into a row keyed
//! by backend column, ready for a [`crate::backend::TableStore`] to append.

use crate::catalog::{RelationKind, Registry, ScalarType};
use crate::error::Error;
use crate::query::InstanceRef;
use joinery_proto::{ResultRow, Value};

/// Input for one field or relation of a row being saved.
#[derive(Debug, Clone)]
pub enum FieldInput {
    /// A plain value.
    Value(Value),
    /// A related instance, stored as its primary key.
    Related(InstanceRef),
}

impl FieldInput {
    /// A plain value.
    pub fn value(value: impl Into<Value>) -> Self {
        FieldInput::Value(value.into())
    }

    /// A related instance.
    pub fn related(instance: &InstanceRef) -> Self {
        FieldInput::Related(instance.clone())
    }
}

/// Key the backend must assign on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    /// Key column.
    pub column: String,
    /// Key type.
    pub field_type: ScalarType,
}

/// A row ready to be appended to a table.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    /// Target table.
    pub table: String,
    /// Primary key column.
    pub key_column: String,
    /// Values keyed by column.
    pub row: ResultRow,
    /// Set when the primary key was left to the backend.
    pub generated_key: Option<GeneratedKey>,
}

/// Prepare a row of `entity` for saving.
///
/// - A null or missing primary key is dropped when it is auto-increment or
///   nullable; otherwise it is an error.
/// - A related instance given for a foreign key is replaced by its primary key.
/// - Missing fields with a default receive it.
/// - Field names become backend column names.
pub fn prepare_for_save(
    registry: &Registry,
    entity: &str,
    values: Vec<(String, FieldInput)>,
) -> Result<PreparedRow, Error> {
    let def = registry.get_entity(entity)?;
    let mut fields: Vec<(String, Value)> = Vec::with_capacity(values.len());

    for (name, input) in values {
        let (field, value) = match def.get_relation(&name) {
            Some(relation) if relation.kind == RelationKind::ForeignKey => {
                let value = match input {
                    FieldInput::Value(value) => value,
                    FieldInput::Related(instance) => {
                        match instance.pk().filter(|pk| !pk.is_null()) {
                            Some(pk) => pk.clone(),
                            None => {
                                return Err(Error::Persistence(format!(
                                    "related '{}' for '{}.{}' has no primary key; save it first",
                                    instance.entity(),
                                    entity,
                                    name
                                )));
                            }
                        }
                    }
                };
                (relation.local_field.clone(), value)
            }
            Some(relation) => {
                return Err(Error::Persistence(format!(
                    "relation '{}.{}' is stored on '{}', not on this row",
                    entity, name, relation.target
                )));
            }
            None => {
                def.field(&name)?;
                match input {
                    FieldInput::Value(value) => (name, value),
                    FieldInput::Related(_) => {
                        return Err(Error::Persistence(format!(
                            "field '{}.{}' takes a value, not an instance",
                            entity, name
                        )));
                    }
                }
            }
        };
        match fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => fields.push((field, value)),
        }
    }

    let key = def.primary_key_field()?;
    let mut generated_key = None;
    let key_given = fields
        .iter()
        .any(|(f, v)| *f == key.name && !v.is_null());
    if !key_given {
        fields.retain(|(f, _)| *f != key.name);
        if key.autoincrement {
            generated_key = Some(GeneratedKey {
                column: key.column().to_string(),
                field_type: key.field_type,
            });
        } else if !key.nullable {
            return Err(Error::Persistence(format!(
                "'{}' needs a value for primary key '{}'",
                entity, key.name
            )));
        }
    }

    for field in &def.fields {
        if field.primary_key || fields.iter().any(|(f, _)| *f == field.name) {
            continue;
        }
        if let Some(default) = &field.default {
            fields.push((field.name.clone(), default.evaluate(field.field_type)?));
        }
    }

    let mut row = ResultRow::new();
    for (field, value) in fields {
        row.insert(def.column_of(&field)?, value);
    }

    Ok(PreparedRow {
        table: def.table_name(),
        key_column: key.column().to_string(),
        row,
        generated_key,
    })
}
