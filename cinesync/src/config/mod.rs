//! Runtime configuration: environment, TOML file, built-in defaults.

pub mod loader;
pub mod sources;
pub mod validation;

use std::path::PathBuf;

use cinesync_core::{EngineConfig, TmdbConfig};

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};

/// Extra pool connections beyond one per worker.
pub const SPARE_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub tmdb: TmdbConfig,
    pub engine: EngineConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }
}
