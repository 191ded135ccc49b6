//! Configuration for the cross-tracker query engine.
//!
//! XTQ_ROOT resolution order:
//! 1. Explicit path passed to Config::with_root()
//! 2. XTQ_ROOT environment variable
//! 3. Default: ~/.local/share/xtq

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding the config file and the database.
    pub root: PathBuf,

    /// Page size used when a caller does not ask for one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Largest page size a caller may ask for.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Largest number of comparisons accepted in one expert query.
    #[serde(default = "default_max_comparisons")]
    pub max_comparisons: usize,
}

fn default_limit() -> usize {
    50
}

fn default_max_limit() -> usize {
    500
}

fn default_max_comparisons() -> usize {
    300
}

impl Config {
    /// Create a new config with the given root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            max_comparisons: default_max_comparisons(),
        }
    }

    /// Create a config using default root resolution.
    pub fn default_location() -> Result<Self> {
        let root = resolve_root()?;
        Ok(Self::with_root(root))
    }

    /// Load config from XTQ_ROOT/config.toml, or create default.
    pub fn load() -> Result<Self> {
        let root = resolve_root()?;
        Self::load_from(&root)
    }

    /// Load config from a specific root.
    pub fn load_from(root: &Path) -> Result<Self> {
        let config_path = root.join("config.toml");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
            // Ensure root matches the actual location
            config.root = root.to_path_buf();
            Ok(config)
        } else {
            Ok(Self::with_root(root))
        }
    }

    /// Save config to XTQ_ROOT/config.toml.
    pub fn save(&self) -> Result<()> {
        let config_path = self.root.join("config.toml");
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_path, contents)?;
        Ok(())
    }

    /// Path to the DuckDB database file.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("db/xtq.duckdb")
    }

    /// Resolve a requested page size against the configured bounds.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            None | Some(0) => self.default_limit,
            Some(n) => n.min(self.max_limit),
        }
    }
}

/// Resolve XTQ_ROOT using the standard resolution order.
fn resolve_root() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("XTQ_ROOT") {
        return Ok(PathBuf::from(path));
    }

    if let Some(proj_dirs) = ProjectDirs::from("", "", "xtq") {
        return Ok(proj_dirs.data_dir().to_path_buf());
    }

    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".local/share/xtq"))
}
