//! Joinery core: entity registry, join planning, graph reassembly and
//! prefetch loading.
//!
//! # Modules
//!
//! - [`catalog`] - Entity, field and relation definitions and the registry
//! - [`query`] - Path resolution, planning, reassembly, prefetch and the loader
//! - [`backend`] - Query backends (in-memory and sled)
//! - [`persist`] - Row preparation for saving
//! - [`config`] - Loader configuration

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod persist;
pub mod query;

pub use backend::{MemoryBackend, QueryBackend, SledBackend, TableStore};
pub use catalog::{
    DefaultValue, EntityDef, FieldDef, Registry, RegistryBuilder, RelationDef, RelationKind,
    ScalarType, ThroughDef,
};
pub use config::LoaderConfig;
pub use error::Error;
pub use persist::{prepare_for_save, FieldInput, PreparedRow};
pub use query::{
    Instance, InstanceRef, Loader, Materialization, PathResolver, QuerySet, RelationTree,
    RelationValue,
};

/// Re-export protocol types.
pub use joinery_proto as proto;
