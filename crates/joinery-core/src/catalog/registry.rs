//! Entity registry and its two-phase builder.
//!
//! Entities are declared first and relation targets are bound by name
//! afterwards, so entities may reference each other (or themselves) in any
//! declaration order.

use std::collections::HashMap;

use super::entity::EntityDef;
use super::field::FieldDef;
use super::relation::{RelationDef, RelationKind, ThroughDef};
use super::types::ScalarType;
use crate::error::Error;
use tracing::{debug, warn};

/// Immutable registry of entity definitions with all relations bound.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: HashMap<String, EntityDef>,
}

impl Registry {
    /// Start declaring entities.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up an entity by name.
    pub fn get_entity(&self, name: &str) -> Result<&EntityDef, Error> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Check whether an entity is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Look up a relation on an entity.
    pub fn relation(&self, entity: &str, name: &str) -> Result<&RelationDef, Error> {
        self.get_entity(entity)?
            .get_relation(name)
            .ok_or_else(|| Error::UnknownRelation {
                entity: entity.to_string(),
                relation: name.to_string(),
            })
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered entities (through entities included).
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Collects entity declarations and binds them into a [`Registry`].
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDef>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity.
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Declare every entity of a JSON array.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let entities: Vec<EntityDef> =
            serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Self { entities })
    }

    /// Bind keys and relations.
    pub fn build(self) -> Result<Registry, Error> {
        let mut order = Vec::with_capacity(self.entities.len());
        let mut entities: HashMap<String, EntityDef> = HashMap::new();

        for mut entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(Error::ModelDefinition(format!(
                    "entity '{}' is declared twice",
                    entity.name
                )));
            }
            // Derived relations are rebuilt below.
            entity.relations.retain(|r| r.reverse_of.is_none());
            bind_primary_key(&mut entity)?;
            order.push(entity.name.clone());
            entities.insert(entity.name.clone(), entity);
        }

        let mut declared = Vec::new();
        for name in &order {
            let entity = lookup(&entities, name)?;
            check_related_names(entity)?;
            for relation in &entity.relations {
                declared.push((name.clone(), relation.clone()));
            }
        }

        for (source, relation) in declared {
            if !entities.contains_key(&relation.target) {
                return Err(Error::ModelDefinition(format!(
                    "relation '{}.{}' targets unknown entity '{}'",
                    source, relation.name, relation.target
                )));
            }
            match relation.kind {
                RelationKind::ForeignKey => bind_foreign_key(&mut entities, &source, relation)?,
                RelationKind::ManyToMany => bind_many_to_many(&mut entities, &source, relation)?,
                RelationKind::ReverseForeignKey => {
                    return Err(Error::ModelDefinition(format!(
                        "relation '{}.{}': reverse relations are derived from foreign keys on '{}'",
                        source, relation.name, relation.target
                    )));
                }
            }
        }

        debug!(entities = entities.len(), "entity registry built");
        Ok(Registry { entities })
    }
}

fn lookup<'a>(entities: &'a HashMap<String, EntityDef>, name: &str) -> Result<&'a EntityDef, Error> {
    entities
        .get(name)
        .ok_or_else(|| Error::UnknownEntity(name.to_string()))
}

fn lookup_mut<'a>(
    entities: &'a mut HashMap<String, EntityDef>,
    name: &str,
) -> Result<&'a mut EntityDef, Error> {
    entities
        .get_mut(name)
        .ok_or_else(|| Error::UnknownEntity(name.to_string()))
}

fn bind_primary_key(entity: &mut EntityDef) -> Result<(), Error> {
    if entity.fields.is_empty() {
        warn!(entity = %entity.name, "entity declares no fields, adding auto-increment 'id' key");
        entity
            .fields
            .push(FieldDef::primary_key("id", ScalarType::Int64));
    }

    for (i, field) in entity.fields.iter().enumerate() {
        if entity.fields[..i].iter().any(|f| f.name == field.name) {
            return Err(Error::ModelDefinition(format!(
                "field '{}' is declared twice on '{}'",
                field.name, entity.name
            )));
        }
    }
    for (i, relation) in entity.relations.iter().enumerate() {
        if entity.relations[..i].iter().any(|r| r.name == relation.name) {
            return Err(Error::ModelDefinition(format!(
                "relation '{}' is declared twice on '{}'",
                relation.name, entity.name
            )));
        }
    }

    let keys: Vec<&FieldDef> = entity.fields.iter().filter(|f| f.primary_key).collect();
    match keys.as_slice() {
        [key] => {
            entity.primary_key = key.name.clone();
            Ok(())
        }
        [] => Err(Error::ModelDefinition(format!(
            "entity '{}' has no primary key",
            entity.name
        ))),
        _ => Err(Error::ModelDefinition(format!(
            "entity '{}' declares {} primary keys",
            entity.name,
            keys.len()
        ))),
    }
}

/// Several relations to one target need distinct reverse names.
fn check_related_names(entity: &EntityDef) -> Result<(), Error> {
    let mut by_target: HashMap<&str, Vec<&RelationDef>> = HashMap::new();
    for relation in &entity.relations {
        by_target
            .entry(relation.target.as_str())
            .or_default()
            .push(relation);
    }

    for (target, relations) in by_target {
        let unnamed = relations
            .iter()
            .filter(|r| r.related_name.is_none())
            .count();
        if relations.len() > 1 && unnamed > 1 {
            return Err(Error::AmbiguousRelation {
                entity: entity.name.clone(),
                target: target.to_string(),
                candidates: relations.iter().map(|r| r.name.clone()).collect(),
            });
        }
    }
    Ok(())
}

fn default_reverse_name(relation: &RelationDef, source: &str) -> String {
    relation
        .related_name
        .clone()
        .unwrap_or_else(|| format!("{}s", source.to_lowercase()))
}

/// Attach a derived relation to its owner, rejecting name clashes.
fn register_reverse(
    entities: &mut HashMap<String, EntityDef>,
    owner: &str,
    reverse: RelationDef,
) -> Result<(), Error> {
    let entity = lookup_mut(entities, owner)?;
    if entity.get_relation(&reverse.name).is_some() || entity.get_field(&reverse.name).is_some() {
        let mut candidates: Vec<String> = entity
            .relations_to(&reverse.target)
            .map(|r| r.name.clone())
            .collect();
        candidates.push(reverse.name.clone());
        return Err(Error::AmbiguousRelation {
            entity: owner.to_string(),
            target: reverse.target.clone(),
            candidates,
        });
    }
    debug!(entity = %owner, relation = %reverse.name, "registered reverse relation");
    entity.relations.push(reverse);
    Ok(())
}

fn replace_relation(entity: &mut EntityDef, relation: RelationDef) {
    if let Some(slot) = entity.relations.iter_mut().find(|r| r.name == relation.name) {
        *slot = relation;
    }
}

fn bind_foreign_key(
    entities: &mut HashMap<String, EntityDef>,
    source: &str,
    mut relation: RelationDef,
) -> Result<(), Error> {
    let target_key = lookup(entities, &relation.target)?
        .primary_key_field()?
        .clone();

    relation.self_reference = relation.target == source;
    relation.remote_field = target_key.name.clone();
    if relation.local_field.is_empty() {
        relation.local_field = format!("{}_id", relation.name);
    }

    let entity = lookup_mut(entities, source)?;
    match entity
        .fields
        .iter()
        .find(|f| f.name == relation.local_field)
    {
        Some(field) if !field.nullable => relation.nullable = false,
        Some(field) if !relation.nullable => {
            return Err(Error::ModelDefinition(format!(
                "required relation '{}.{}' uses nullable field '{}'",
                source, relation.name, field.name
            )));
        }
        Some(_) => {}
        None => {
            let mut field = FieldDef::new(relation.local_field.clone(), target_key.field_type);
            field.nullable = relation.nullable;
            entity.fields.push(field);
        }
    }
    replace_relation(entity, relation.clone());

    let reverse = RelationDef {
        name: default_reverse_name(&relation, source),
        kind: RelationKind::ReverseForeignKey,
        target: source.to_string(),
        nullable: true,
        local_field: target_key.name,
        remote_field: relation.local_field.clone(),
        through: None,
        related_name: Some(relation.name.clone()),
        self_reference: relation.self_reference,
        reverse_of: Some(relation.name.clone()),
    };
    register_reverse(entities, &relation.target, reverse)
}

fn bind_many_to_many(
    entities: &mut HashMap<String, EntityDef>,
    source: &str,
    mut relation: RelationDef,
) -> Result<(), Error> {
    let source_key = lookup(entities, source)?.primary_key_field()?.clone();
    let target_key = lookup(entities, &relation.target)?
        .primary_key_field()?
        .clone();

    relation.self_reference = relation.target == source;
    relation.nullable = true;
    relation.local_field = source_key.name.clone();
    relation.remote_field = target_key.name.clone();

    let mut through = relation
        .through
        .clone()
        .unwrap_or_else(|| ThroughDef::new(format!("{}{}", source, relation.target)));
    let (source_column, target_column) = if relation.self_reference {
        let lower = source.to_lowercase();
        (format!("from_{}", lower), format!("to_{}", lower))
    } else {
        (source.to_lowercase(), relation.target.to_lowercase())
    };
    if through.source_field.is_empty() {
        through.source_field = source_column;
    }
    if through.target_field.is_empty() {
        through.target_field = target_column;
    }
    if through.source_field == through.target_field {
        return Err(Error::ModelDefinition(format!(
            "relation '{}.{}' links both ends through the same field '{}'",
            source, relation.name, through.source_field
        )));
    }

    if !entities.contains_key(&through.entity) {
        debug!(through = %through.entity, "synthesising through entity");
        let mut link = EntityDef::new(through.entity.clone())
            .with_field(FieldDef::primary_key("id", ScalarType::Int64));
        link.primary_key = "id".to_string();
        entities.insert(through.entity.clone(), link);
    }
    let link = lookup_mut(entities, &through.entity)?;
    for (field, field_type) in [
        (&through.source_field, source_key.field_type),
        (&through.target_field, target_key.field_type),
    ] {
        if link.get_field(field).is_none() {
            link.fields.push(FieldDef::new(field.clone(), field_type));
        }
    }

    relation.through = Some(through.clone());
    replace_relation(lookup_mut(entities, source)?, relation.clone());

    let reverse = RelationDef {
        name: default_reverse_name(&relation, source),
        kind: RelationKind::ManyToMany,
        target: source.to_string(),
        nullable: true,
        local_field: target_key.name,
        remote_field: source_key.name,
        through: Some(through.reversed()),
        related_name: Some(relation.name.clone()),
        self_reference: relation.self_reference,
        reverse_of: Some(relation.name.clone()),
    };
    register_reverse(entities, &relation.target, reverse)
}
