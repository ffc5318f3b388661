use std::{
    fs,
    path::PathBuf,
    time::Duration,
};

use cinesync_core::{EngineConfig, NotFoundPolicy, TmdbConfig};
use thiserror::Error;
use url::Url;

use super::{
    Config, ConfigMetadata, DatabaseConfig, SPARE_CONNECTIONS,
    sources::{EnvConfig, FileConfig, FileDatabaseConfig, FileEngineConfig, FileTmdbConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["cinesync.toml", "config/cinesync.toml"];

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Command-line overrides; they win over every other source.
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Compose from an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let config_present = file_config.is_some();

        let mut warnings = ConfigWarnings::default();
        if !config_present {
            warnings.push_with_hint(
                "No cinesync.toml detected; using environment variables and defaults",
                "Pass --config or set CINESYNC_CONFIG to use a configuration file",
            );
        }

        let FileConfig {
            database: file_database,
            tmdb: file_tmdb,
            engine: file_engine,
        } = file_config.unwrap_or_default();

        let engine = self.compose_engine(&env, file_engine)?;
        let tmdb = compose_tmdb(&env, file_tmdb)?;
        let database = DatabaseConfig {
            url: resolve_database_url(&env, &file_database)?,
            max_connections: env
                .database_max_connections
                .or(file_database.max_connections)
                .unwrap_or_else(|| {
                    u32::try_from(engine.concurrency)
                        .unwrap_or(u32::MAX)
                        .saturating_add(SPARE_CONNECTIONS)
                }),
        };

        let config = Config {
            database,
            tmdb,
            engine,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_engine(
        &self,
        env: &EnvConfig,
        file: FileEngineConfig,
    ) -> Result<EngineConfig, ConfigLoadError> {
        let defaults = EngineConfig::default();

        let liveness_timeout = parse_duration_field(
            "liveness_timeout",
            env.liveness_timeout.as_deref().or(file.liveness_timeout.as_deref()),
        )?;
        let rate_limit_pause =
            parse_duration_field("rate_limit_pause", file.rate_limit_pause.as_deref())?;
        let refresh_after = parse_duration_field(
            "refresh_after",
            env.refresh_after.as_deref().or(file.refresh_after.as_deref()),
        )?;

        let not_found_policy = match env
            .not_found_policy
            .as_deref()
            .or(file.not_found_policy.as_deref())
        {
            Some(raw) => raw
                .parse::<NotFoundPolicy>()
                .map_err(|reason| ConfigLoadError::InvalidValue {
                    field: "not_found_policy",
                    reason,
                })?,
            None => defaults.not_found_policy,
        };

        Ok(EngineConfig {
            max_retries: self
                .options
                .max_retries
                .or(env.max_retries)
                .or(file.max_retries)
                .unwrap_or(defaults.max_retries),
            concurrency: self
                .options
                .concurrency
                .or(env.concurrency)
                .or(file.concurrency)
                .unwrap_or(defaults.concurrency),
            liveness_timeout_secs: liveness_timeout
                .map(|d| d.as_secs())
                .unwrap_or(defaults.liveness_timeout_secs),
            batch_size: env
                .batch_size
                .or(file.batch_size)
                .unwrap_or(defaults.batch_size),
            rate_limit_pause_ms: rate_limit_pause
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(defaults.rate_limit_pause_ms),
            not_found_policy,
            refresh_after_days: refresh_after
                .map(|d| u32::try_from(d.as_secs() / SECONDS_PER_DAY).unwrap_or(u32::MAX))
                .unwrap_or(defaults.refresh_after_days),
        })
    }
}

fn compose_tmdb(env: &EnvConfig, file: FileTmdbConfig) -> Result<TmdbConfig, ConfigLoadError> {
    let defaults = TmdbConfig::default();
    let request_timeout =
        parse_duration_field("request_timeout", file.request_timeout.as_deref())?;
    let connect_timeout =
        parse_duration_field("connect_timeout", file.connect_timeout.as_deref())?;

    Ok(TmdbConfig {
        api_key: env.tmdb_api_key.clone().or(file.api_key),
        api_base_url: env
            .tmdb_api_base_url
            .clone()
            .or(file.api_base_url)
            .unwrap_or(defaults.api_base_url),
        export_base_url: env
            .tmdb_export_base_url
            .clone()
            .or(file.export_base_url)
            .unwrap_or(defaults.export_base_url),
        requests_per_second: env
            .tmdb_rate_limit
            .or(file.requests_per_second)
            .unwrap_or(defaults.requests_per_second),
        request_timeout_secs: request_timeout
            .map(|d| d.as_secs().max(1))
            .unwrap_or(defaults.request_timeout_secs),
        connect_timeout_secs: connect_timeout
            .map(|d| d.as_secs().max(1))
            .unwrap_or(defaults.connect_timeout_secs),
    })
}

fn parse_duration_field(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|value| {
        humantime::parse_duration(value.trim())
            .map_err(|source| ConfigLoadError::InvalidDuration { field, source })
    })
    .transpose()
}

fn resolve_database_url(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(url) = env.database_url.clone() {
        return Ok(Some(url));
    }

    if let Some(stored_url) = file_database.url.as_deref() {
        let trimmed = stored_url.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let mut parsed = Url::parse(trimmed)
            .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        if parsed.password().is_none()
            && let Some(password) = env.database_password.as_deref()
        {
            parsed
                .set_password(Some(password))
                .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
        }
        return Ok(Some(parsed.to_string()));
    }

    if let (Some(host), Some(user), Some(name)) = (
        env.database_host.as_deref(),
        env.database_user.as_deref(),
        env.database_name.as_deref(),
    ) {
        let port = env.database_port.unwrap_or(5432);
        let mut url = Url::parse(&format!("postgresql://{host}:{port}/{name}"))
            .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        url.set_username(user)
            .map_err(|_| ConfigLoadError::InvalidDatabaseUsername {
                username: user.to_string(),
            })?;
        if let Some(password) = env.database_password.as_deref() {
            url.set_password(Some(password))
                .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
        }
        return Ok(Some(url.to_string()));
    }

    Ok(None)
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {field}")]
    InvalidDuration {
        field: &'static str,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid database username '{username}'")]
    InvalidDatabaseUsername { username: String },
    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
