use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub tmdb: FileTmdbConfig,
    #[serde(default)]
    pub engine: FileEngineConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTmdbConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<u32>,
    /// humantime string, e.g. `60s`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileEngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_pause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_after: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_name: Option<String>,
    pub database_user: Option<String>,
    pub database_password: Option<String>,
    pub database_max_connections: Option<u32>,
    pub tmdb_api_key: Option<String>,
    pub tmdb_api_base_url: Option<String>,
    pub tmdb_export_base_url: Option<String>,
    pub tmdb_rate_limit: Option<u32>,
    pub max_retries: Option<u32>,
    pub concurrency: Option<usize>,
    pub liveness_timeout: Option<String>,
    pub refresh_after: Option<String>,
    pub batch_size: Option<usize>,
    pub not_found_policy: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        fn parse_with<T: std::str::FromStr>(
            var: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            var(name).and_then(|s| s.parse().ok())
        }
        let parsed_u16 = |name: &str| parse_with::<u16>(&var, name);
        let parsed_u32 = |name: &str| parse_with::<u32>(&var, name);
        let parsed_usize = |name: &str| parse_with::<usize>(&var, name);

        Self {
            config_path: var("CINESYNC_CONFIG").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            database_host: var("DB_HOST"),
            database_port: parsed_u16("DB_PORT"),
            database_name: var("DB_NAME"),
            database_user: var("DB_USER"),
            database_password: var("DB_PASSWORD"),
            database_max_connections: parsed_u32("DB_MAX_CONNECTIONS"),
            tmdb_api_key: var("TMDB_API_KEY"),
            tmdb_api_base_url: var("TMDB_API_BASE_URL"),
            tmdb_export_base_url: var("TMDB_EXPORT_BASE_URL"),
            tmdb_rate_limit: parsed_u32("TMDB_RATE_LIMIT"),
            max_retries: parsed_u32("MAX_RETRIES"),
            concurrency: parsed_usize("CONCURRENCY").or_else(|| parsed_usize("MAX_WORKERS")),
            liveness_timeout: var("LIVENESS_TIMEOUT"),
            refresh_after: var("REFRESH_AFTER"),
            batch_size: parsed_usize("BATCH_SIZE"),
            not_found_policy: var("NOT_FOUND_POLICY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn max_workers_is_an_alias_for_concurrency() {
        assert_eq!(env(&[("MAX_WORKERS", "4")]).concurrency, Some(4));
        assert_eq!(
            env(&[("MAX_WORKERS", "4"), ("CONCURRENCY", "8")]).concurrency,
            Some(8)
        );
    }

    #[test]
    fn blank_and_unparsable_values_are_ignored() {
        let config = env(&[("DATABASE_URL", "  "), ("MAX_RETRIES", "lots")]);
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_retries, None);
    }

    #[test]
    fn toml_sections_are_optional() {
        let file: FileConfig = toml::from_str(
            r#"
            [engine]
            max_retries = 5
            liveness_timeout = "30m"
            "#,
        )
        .expect("parses");
        assert_eq!(file.engine.max_retries, Some(5));
        assert_eq!(file.engine.liveness_timeout.as_deref(), Some("30m"));
        assert!(file.database.url.is_none());
        assert!(file.tmdb.api_key.is_none());
    }
}
