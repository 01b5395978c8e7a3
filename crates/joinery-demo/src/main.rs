//! Joinery demo binary.
//!
//! Seeds a small library graph into an in-memory or sled backend, loads
//! books with the requested relations and prints them as JSON.

mod config;
mod seed;

use std::sync::Arc;

use clap::Parser;
use joinery_core::{Error, InstanceRef, Loader, MemoryBackend, QueryBackend, Registry, SledBackend};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{Args, DemoConfig, LoadMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "joinery_demo=info,joinery_core=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Joinery demo");

    let config = Args::parse().into_config()?;
    let registry = Arc::new(seed::library_registry()?);

    let books = match &config.data_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using sled backend");
            let backend = Arc::new(SledBackend::open(path)?);
            seed::seed(&*backend, &registry)?;
            let books = run(&registry, backend.clone(), &config).await?;
            backend.flush()?;
            books
        }
        None => {
            let backend = Arc::new(MemoryBackend::new());
            seed::seed(&*backend, &registry)?;
            run(&registry, backend, &config).await?
        }
    };

    let rendered: Vec<_> = books.iter().map(|book| book.to_json()).collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

async fn run<B: QueryBackend>(
    registry: &Arc<Registry>,
    backend: Arc<B>,
    config: &DemoConfig,
) -> Result<Vec<InstanceRef>, Error> {
    let loader = Loader::with_config(registry.clone(), backend, config.loader.clone());
    let mut query = loader.query("Book").order_by(&config.order_by);
    for path in &config.paths {
        query = match config.mode {
            LoadMode::Select => query.select_related(path),
            LoadMode::Prefetch => query.prefetch_related(path),
        };
    }
    if let Some(limit) = config.limit {
        query = query.limit(limit);
    }
    if config.offset > 0 {
        query = query.offset(config.offset);
    }

    let books = query.all().await?;
    tracing::info!(books = books.len(), mode = ?config.mode, "loaded");
    Ok(books)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn load(config: &DemoConfig) -> (Vec<serde_json::Value>, u64) {
        let registry = Arc::new(seed::library_registry().unwrap());
        let backend = Arc::new(MemoryBackend::new());
        seed::seed(&*backend, &registry).unwrap();
        let books = run(&registry, backend.clone(), config).await.unwrap();
        (books.iter().map(|b| b.to_json()).collect(), backend.statement_count())
    }

    #[tokio::test]
    async fn test_modes_render_the_same_graph() {
        let joined = DemoConfig::default();
        let prefetched = DemoConfig {
            mode: LoadMode::Prefetch,
            ..DemoConfig::default()
        };

        let (joined_json, joined_statements) = load(&joined).await;
        let (prefetched_json, prefetched_statements) = load(&prefetched).await;
        assert_eq!(joined_statements, 1);
        // The required author is joined with the books; reviews and tags
        // take one statement each.
        assert_eq!(prefetched_statements, 3);

        let summary = |books: &[serde_json::Value]| -> Vec<(String, String, usize, usize)> {
            books
                .iter()
                .map(|b| {
                    (
                        b["title"].as_str().unwrap().to_string(),
                        b["author"]["name"].as_str().unwrap().to_string(),
                        b["reviews"].as_array().unwrap().len(),
                        b["tags"].as_array().unwrap().len(),
                    )
                })
                .collect()
        };
        let books = summary(&joined_json);
        assert_eq!(books, summary(&prefetched_json));
        assert_eq!(books.len(), 6);
        assert_eq!(
            books[0],
            ("A Wizard of Earthsea".to_string(), "Ursula K. Le Guin".to_string(), 2, 2)
        );
    }

    #[tokio::test]
    async fn test_sled_backend_persists_seed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = seed::library_registry().unwrap();
        {
            let backend = SledBackend::open(dir.path()).unwrap();
            assert!(seed::seed(&backend, &registry).unwrap() > 0);
            backend.flush().unwrap();
        }
        let backend = Arc::new(SledBackend::open(dir.path()).unwrap());
        assert_eq!(seed::seed(&*backend, &registry).unwrap(), 0);

        let config = DemoConfig {
            limit: Some(2),
            ..DemoConfig::default()
        };
        let books = run(&Arc::new(registry), backend, &config).await.unwrap();
        assert_eq!(books.len(), 2);
        assert!(books[0].one("author").is_some());
    }
}
