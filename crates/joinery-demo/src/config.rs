//! Demo configuration.

use clap::{Parser, ValueEnum};
use joinery_core::{Error, LoaderConfig, Materialization};
use std::path::PathBuf;

/// Default number of books listed.
pub const DEFAULT_LIMIT: u32 = 10;

/// Default relation paths loaded onto every book.
pub const DEFAULT_PATHS: &[&str] = &["author", "reviews", "tags"];

/// How relations are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoadMode {
    /// One joined statement.
    Select,
    /// One statement per relation level.
    Prefetch,
}

/// Instance materialisation, as named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MaterializationArg {
    /// A fresh instance for every joined row.
    Distinct,
    /// One instance per entity key.
    Shared,
}

impl From<MaterializationArg> for Materialization {
    fn from(arg: MaterializationArg) -> Self {
        match arg {
            MaterializationArg::Distinct => Materialization::Distinct,
            MaterializationArg::Shared => Materialization::Shared,
        }
    }
}

/// Demo configuration.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Sled directory. `None` keeps everything in memory.
    pub data_path: Option<PathBuf>,

    /// How relations are loaded.
    pub mode: LoadMode,

    /// Relation paths to load, relative to `Book`.
    pub paths: Vec<String>,

    /// Field to order books by.
    pub order_by: String,

    /// Maximum number of results.
    pub limit: Option<u32>,

    /// Results to skip.
    pub offset: u32,

    /// Loader settings.
    pub loader: LoaderConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            mode: LoadMode::Select,
            paths: DEFAULT_PATHS.iter().map(|p| p.to_string()).collect(),
            order_by: "title".to_string(),
            limit: Some(DEFAULT_LIMIT),
            offset: 0,
            loader: LoaderConfig::default(),
        }
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "joinery-demo")]
#[command(about = "Load a sample library graph with joined or prefetched relations")]
#[command(version)]
pub struct Args {
    /// Sled directory to store the sample data in (in memory when omitted)
    #[arg(short, long)]
    pub data_path: Option<PathBuf>,

    /// Relation loading mode
    #[arg(short, long, value_enum, default_value_t = LoadMode::Select)]
    pub mode: LoadMode,

    /// Relation path to load; repeat for several (defaults to author, reviews, tags)
    #[arg(short, long = "path")]
    pub paths: Vec<String>,

    /// Order books by this field, prefixed with '-' for descending
    #[arg(long, default_value = "title")]
    pub order_by: String,

    /// Maximum number of results (0 for no limit)
    #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
    pub limit: u32,

    /// Results to skip
    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Count limit and offset in joined rows instead of books
    #[arg(long)]
    pub raw: bool,

    /// Materialisation of joined instances
    #[arg(long, value_enum)]
    pub materialization: Option<MaterializationArg>,

    /// Maximum relation depth
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// JSON file with loader settings; flags above override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Convert arguments into a demo configuration.
    pub fn into_config(self) -> Result<DemoConfig, Error> {
        let mut loader = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    Error::Deserialization(format!("reading {}: {}", path.display(), e))
                })?;
                LoaderConfig::from_json(&json)?
            }
            None => LoaderConfig::default(),
        };
        if self.raw {
            loader = loader.with_raw_pagination(true);
        }
        if let Some(materialization) = self.materialization {
            loader = loader.with_materialization(materialization.into());
        }
        if let Some(depth) = self.max_depth {
            loader = loader.with_max_depth(depth);
        }

        let paths = if self.paths.is_empty() {
            DEFAULT_PATHS.iter().map(|p| p.to_string()).collect()
        } else {
            self.paths
        };

        Ok(DemoConfig {
            data_path: self.data_path,
            mode: self.mode,
            paths,
            order_by: self.order_by,
            limit: (self.limit > 0).then_some(self.limit),
            offset: self.offset,
            loader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Args::try_parse_from(["joinery-demo"])
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.mode, LoadMode::Select);
        assert_eq!(config.paths, vec!["author", "reviews", "tags"]);
        assert_eq!(config.limit, Some(DEFAULT_LIMIT));
        assert!(config.data_path.is_none());
        assert_eq!(config.loader, LoaderConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_depth": 3, "materialization": "shared"}}"#).unwrap();

        let config = Args::try_parse_from([
            "joinery-demo",
            "--mode",
            "prefetch",
            "--path",
            "reviews",
            "--limit",
            "0",
            "--raw",
            "--max-depth",
            "5",
            "--config",
            file.path().to_str().unwrap(),
        ])
        .unwrap()
        .into_config()
        .unwrap();

        assert_eq!(config.mode, LoadMode::Prefetch);
        assert_eq!(config.paths, vec!["reviews"]);
        assert_eq!(config.limit, None);
        assert_eq!(config.loader.max_depth, 5);
        assert_eq!(config.loader.materialization, Materialization::Shared);
        assert!(config.loader.raw_pagination);
    }

    #[test]
    fn test_missing_config_file() {
        let result = Args::try_parse_from(["joinery-demo", "--config", "/nonexistent/joinery.json"])
            .unwrap()
            .into_config();
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }
}
