//! Benchmark harness helpers.

use std::sync::Arc;
use std::time::Duration;

use joinery_core::backend::MemoryBackend;
use joinery_core::catalog::Registry;
use joinery_core::query::Loader;
use tracing::debug;

use crate::fixtures::{blog_registry, generate, Scale};

/// Seeded registry and backend for isolated benchmark runs.
pub struct TestContext {
    pub registry: Arc<Registry>,
    pub backend: Arc<MemoryBackend>,
}

impl TestContext {
    /// A context populated at `scale`.
    pub fn with_scale(scale: Scale) -> Self {
        Self::build(scale, None)
    }

    /// A context populated at `scale` whose backend waits `latency` per
    /// statement, as a networked database would.
    pub fn with_latency(scale: Scale, latency: Duration) -> Self {
        Self::build(scale, Some(latency))
    }

    fn build(scale: Scale, latency: Option<Duration>) -> Self {
        let registry = blog_registry().expect("blog schema is valid");
        let mut backend = MemoryBackend::new();
        if let Some(latency) = latency {
            backend = backend.with_latency(latency);
        }
        let data = generate(scale);
        debug!(?scale, rows = data.len(), "seeding benchmark backend");
        for (table, rows) in data.tables {
            backend = backend.with_rows(table, rows);
        }
        Self {
            registry: Arc::new(registry),
            backend: Arc::new(backend),
        }
    }

    /// A loader over this context.
    pub fn loader(&self) -> Loader<MemoryBackend> {
        Loader::new(self.registry.clone(), self.backend.clone())
    }
}
