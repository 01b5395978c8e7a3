//! Joinery benchmark suite.
//!
//! Compares `select_related` (one joined statement) with `prefetch_related`
//! (one statement per relation level) over the same generated blog graph,
//! with and without simulated statement latency.

pub mod fixtures;
pub mod harness;

pub use fixtures::{blog_registry, generate, Scale};
pub use harness::TestContext;
