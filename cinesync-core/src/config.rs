use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to record when the catalog reports an id as gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundPolicy {
    /// Terminal failure with `error_kind = not_found`; stays queryable.
    #[default]
    TerminalFailure,
    /// Treat the item as legitimately retired and mark it completed.
    MarkCompleted,
}

impl std::str::FromStr for NotFoundPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminal_failure" | "terminal" | "failed" => {
                Ok(NotFoundPolicy::TerminalFailure)
            }
            "mark_completed" | "completed" => Ok(NotFoundPolicy::MarkCompleted),
            other => Err(format!("unknown not-found policy '{other}'")),
        }
    }
}

/// Knobs for one ingestion run.
///
/// Every field has a default so a bare configuration file (or none at all)
/// produces a working engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Failures allowed before an item becomes terminal.
    pub max_retries: u32,
    /// Parallel worker slots.
    pub concurrency: usize,
    /// Age after which an `in_progress` row is considered abandoned.
    pub liveness_timeout_secs: u64,
    /// Maximum ids pulled from the state store per scheduling pass.
    pub batch_size: usize,
    /// Pool-wide pause when the catalog throttles without a Retry-After hint.
    pub rate_limit_pause_ms: u64,
    pub not_found_policy: NotFoundPolicy,
    /// Completed entities older than this are re-queued by `refresh`.
    pub refresh_after_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            concurrency: 10,
            liveness_timeout_secs: 60 * 60,
            batch_size: 100,
            rate_limit_pause_ms: 10_000,
            not_found_policy: NotFoundPolicy::default(),
            refresh_after_days: 30,
        }
    }
}

impl EngineConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_millis(self.rate_limit_pause_ms)
    }

    pub fn refresh_after(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.refresh_after_days))
    }
}

/// Catalog API access.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TmdbConfig {
    /// v3 API key or v4 read access token.
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub export_base_url: String,
    /// Client-side request ceiling shared by all workers.
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.themoviedb.org/3".to_string(),
            export_base_url: "https://files.tmdb.org/p/exports".to_string(),
            requests_per_second: 29,
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for TmdbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmdbConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("export_base_url", &self.export_base_url)
            .field("requests_per_second", &self.requests_per_second)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.liveness_timeout(), Duration::from_secs(3600));
        assert_eq!(config.not_found_policy, NotFoundPolicy::TerminalFailure);
    }

    #[test]
    fn partial_payload_keeps_remaining_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_retries": 5, "not_found_policy": "mark_completed"}"#,
        )
        .expect("config parses");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.not_found_policy, NotFoundPolicy::MarkCompleted);
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let config = TmdbConfig {
            api_key: Some("secret-token".into()),
            ..TmdbConfig::default()
        };
        assert!(!format!("{config:?}").contains("secret-token"));
    }
}
