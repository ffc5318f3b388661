use thiserror::Error;

use super::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("{field} must be at least 1")]
    ZeroValue { field: &'static str },
    #[error("database max_connections ({max_connections}) must exceed concurrency ({concurrency})")]
    PoolTooSmall {
        max_connections: u32,
        concurrency: usize,
    },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let engine = &config.engine;

    for (field, value) in [
        ("max_retries", engine.max_retries as usize),
        ("concurrency", engine.concurrency),
        ("batch_size", engine.batch_size),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroValue { field });
        }
    }

    // Each worker holds one connection for its write transaction.
    if let Ok(max) = usize::try_from(config.database.max_connections)
        && max <= engine.concurrency
    {
        return Err(ConfigGuardRailError::PoolTooSmall {
            max_connections: config.database.max_connections,
            concurrency: engine.concurrency,
        });
    }

    if config.tmdb.api_key.is_none() {
        warnings.push_with_hint(
            "TMDB_API_KEY not configured; catalog fetches will fail",
            "Set TMDB_API_KEY or add api_key to the [tmdb] section",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "No database URL configured",
            "Set DATABASE_URL, or DB_HOST/DB_NAME/DB_USER (and DB_PASSWORD)",
        );
    }

    if engine.batch_size < engine.concurrency {
        warnings.push(format!(
            "batch_size ({}) is below concurrency ({}); some workers will idle every pass",
            engine.batch_size, engine.concurrency
        ));
    }

    if config.tmdb.requests_per_second == 0 {
        warnings.push("TMDB_RATE_LIMIT is 0; client-side request pacing is disabled");
    }

    Ok(warnings)
}
