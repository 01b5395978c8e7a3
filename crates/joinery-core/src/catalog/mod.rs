//! Entity registry.
//!
//! The registry holds entity definitions (fields, primary key, relations)
//! with every relation bound to its target and reverse relations derived.

mod entity;
mod field;
mod registry;
mod relation;
mod types;

pub use entity::EntityDef;
pub use field::FieldDef;
pub use registry::{Registry, RegistryBuilder};
pub use relation::{RelationDef, RelationKind, ThroughDef};
pub use types::{DefaultValue, ScalarType};
