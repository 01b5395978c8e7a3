//! Materialised entity instances.
//!
//! An [`Instance`] holds the projected field values of one row and a slot per
//! loaded relation. Instances are handed out as [`InstanceRef`]s so prefetch
//! loading can attach the same child to several parents; identity is pointer
//! identity ([`Instance::same`]).

use std::collections::HashMap;
use std::sync::Arc;

use joinery_proto::Value;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};

/// Shared handle to an instance.
pub type InstanceRef = Arc<Instance>;

/// Content of a loaded relation slot.
#[derive(Debug, Clone)]
pub enum RelationValue {
    /// To-one relation with no related row.
    Absent,
    /// To-one relation.
    One(InstanceRef),
    /// To-many relation, in load order.
    Many(Vec<InstanceRef>),
}

impl RelationValue {
    /// Instances held by this slot.
    pub fn instances(&self) -> Vec<InstanceRef> {
        match self {
            RelationValue::Absent => Vec::new(),
            RelationValue::One(instance) => vec![instance.clone()],
            RelationValue::Many(instances) => instances.clone(),
        }
    }
}

/// One materialised entity row.
#[derive(Debug)]
pub struct Instance {
    entity: String,
    primary_key: String,
    fields: Vec<(String, Value)>,
    relations: RwLock<HashMap<String, RelationValue>>,
}

impl Instance {
    /// Create an instance from projected field values.
    pub fn new(
        entity: impl Into<String>,
        primary_key: impl Into<String>,
        fields: Vec<(String, Value)>,
    ) -> Self {
        Self {
            entity: entity.into(),
            primary_key: primary_key.into(),
            fields,
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> InstanceRef {
        Arc::new(self)
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Primary key value, if projected.
    pub fn pk(&self) -> Option<&Value> {
        self.get(&self.primary_key)
    }

    /// Value of a projected field. Fields left out by a projection are `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Projected fields in projection order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Whether two handles denote the same instance.
    pub fn same(a: &InstanceRef, b: &InstanceRef) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// A copy with the same field values and no loaded relations.
    pub fn detached(&self) -> Self {
        Self::new(
            self.entity.clone(),
            self.primary_key.clone(),
            self.fields.clone(),
        )
    }

    /// Fill a relation slot, replacing what was there.
    pub fn set_relation(&self, name: impl Into<String>, value: RelationValue) {
        self.relations.write().insert(name.into(), value);
    }

    /// Content of a relation slot; `None` when the relation was not loaded.
    pub fn related(&self, name: &str) -> Option<RelationValue> {
        self.relations.read().get(name).cloned()
    }

    /// Whether a relation was loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.relations.read().contains_key(name)
    }

    /// The related instance of a loaded to-one relation.
    pub fn one(&self, name: &str) -> Option<InstanceRef> {
        match self.related(name) {
            Some(RelationValue::One(instance)) => Some(instance),
            _ => None,
        }
    }

    /// The related instances of a loaded relation (empty when not loaded).
    pub fn many(&self, name: &str) -> Vec<InstanceRef> {
        self.related(name)
            .map(|value| value.instances())
            .unwrap_or_default()
    }

    /// Names of loaded relations, sorted.
    pub fn loaded_relations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.relations.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Render the instance and its loaded relations as JSON.
    pub fn to_json(&self) -> Json {
        let mut object = Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), scalar_json(value));
        }
        for name in self.loaded_relations() {
            let rendered = match self.related(&name) {
                Some(RelationValue::One(child)) => child.to_json(),
                Some(RelationValue::Many(children)) => {
                    Json::Array(children.iter().map(|c| c.to_json()).collect())
                }
                Some(RelationValue::Absent) | None => Json::Null,
            };
            object.insert(name, rendered);
        }
        Json::Object(object)
    }
}

fn scalar_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int32(n) => Json::from(*n),
        Value::Int64(n) | Value::Timestamp(n) => Json::from(*n),
        Value::Float32(f) => Json::from(*f as f64),
        Value::Float64(f) => Json::from(*f),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(_) | Value::Uuid(_) => Json::String(value.to_string()),
    }
}
