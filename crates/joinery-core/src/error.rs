//! Core error types.

use thiserror::Error;

/// Relation-loading errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] joinery_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// No entity with this name is registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// The entity has no such field.
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// A relation-path hop does not exist on the entity reached so far.
    #[error("unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// Several relations lead to the same target and the caller did not pick one.
    #[error(
        "ambiguous relation from '{entity}' to '{target}': candidates {candidates:?}"
    )]
    AmbiguousRelation {
        entity: String,
        target: String,
        candidates: Vec<String>,
    },

    /// The schema itself is inconsistent.
    #[error("model definition error: {0}")]
    ModelDefinition(String),

    /// Conflicting or invalid query options.
    #[error("query definition error: {0}")]
    QueryDefinition(String),

    /// A required relation did not resolve to any row.
    #[error(
        "integrity violation: required relation '{relation}' on '{entity}' has no row for key {key}"
    )]
    IntegrityViolation {
        entity: String,
        relation: String,
        key: String,
    },

    /// A row could not be prepared for persistence.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The query backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The load request was cancelled before completion.
    #[error("load cancelled")]
    Cancelled,
}
