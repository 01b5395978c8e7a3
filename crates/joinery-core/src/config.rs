//! Loader configuration.

use crate::error::Error;
use crate::query::Materialization;
use serde::{Deserialize, Serialize};

/// Default maximum relation depth.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Default maximum number of rows a single statement may return.
pub const DEFAULT_MAX_ROWS: usize = 100_000;

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of hops in a relation path, required relations included.
    pub max_depth: usize,

    /// Maximum number of rows accepted from one statement.
    pub max_rows: usize,

    /// How joined rows become instances.
    pub materialization: Materialization,

    /// How prefetched children are attached to their parents.
    pub prefetch_materialization: Materialization,

    /// Apply limit/offset to the raw joined rows unless a query says otherwise.
    pub raw_pagination: bool,
}

impl LoaderConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_rows: DEFAULT_MAX_ROWS,
            materialization: Materialization::Distinct,
            prefetch_materialization: Materialization::Shared,
            raw_pagination: false,
        }
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Set the maximum relation depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the maximum rows per statement.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Set the join-mode materialization strategy.
    pub fn with_materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self
    }

    /// Set the prefetch attachment strategy.
    pub fn with_prefetch_materialization(mut self, materialization: Materialization) -> Self {
        self.prefetch_materialization = materialization;
        self
    }

    /// Make raw-row pagination the default.
    pub fn with_raw_pagination(mut self, raw: bool) -> Self {
        self.raw_pagination = raw;
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
