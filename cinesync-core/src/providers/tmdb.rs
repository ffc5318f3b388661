use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cinesync_model::ContentType;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{CatalogClient, FetchError, RequestPacer};
use crate::config::TmdbConfig;
use crate::error::{IngestError, Result};

/// Sub-resources folded into a single title request.
const TITLE_APPENDS: &str = "credits,external_ids,keywords,similar";
const PERSON_APPENDS: &str = "external_ids";

/// Longest upstream error body quoted in a failure message.
const MAX_BODY_EXCERPT: usize = 200;

enum Credentials {
    /// v4 read access token, sent as a bearer header.
    Bearer(String),
    /// v3 key, sent as the `api_key` query parameter.
    ApiKey(String),
}

impl Credentials {
    fn from_key(key: &str) -> Self {
        // v4 tokens are JWTs; v3 keys are 32 hex chars.
        if key.matches('.').count() == 2 {
            Credentials::Bearer(key.to_string())
        } else {
            Credentials::ApiKey(key.to_string())
        }
    }
}

/// Detail fetches against the TMDB REST API.
pub struct TmdbClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
    pacer: RequestPacer,
}

impl fmt::Debug for TmdbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = match self.credentials {
            Credentials::Bearer(_) => "bearer",
            Credentials::ApiKey(_) => "api_key",
        };
        f.debug_struct("TmdbClient")
            .field("base_url", &self.base_url.as_str())
            .field("auth", &auth)
            .field("pacer", &self.pacer)
            .finish()
    }
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> Result<Self> {
        let key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                IngestError::Config(
                    "TMDB_API_KEY is required to fetch catalog records".into(),
                )
            })?;

        let http = Client::builder()
            .user_agent(concat!("cinesync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                IngestError::Config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url: directory_url(&config.api_base_url)?,
            credentials: Credentials::from_key(key),
            pacer: RequestPacer::per_second(config.requests_per_second),
        })
    }

    fn detail_url(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> std::result::Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(&format!("{}/{}", content_type.api_path(), external_id))
            .map_err(|e| FetchError::Permanent(format!("invalid request url: {e}")))?;

        let appends = match content_type {
            ContentType::Movie | ContentType::TvSeries => TITLE_APPENDS,
            ContentType::Person => PERSON_APPENDS,
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("append_to_response", appends);
            if let Credentials::ApiKey(key) = &self.credentials {
                query.append_pair("api_key", key);
            }
        }
        Ok(url)
    }
}

/// Parse a base URL so that `join` appends instead of replacing the last
/// path segment.
pub(crate) fn directory_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw)
        .map_err(|e| IngestError::Config(format!("invalid base url '{raw}': {e}")))
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Map a non-success response onto the fetch error taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT => {
            FetchError::Transient(format!("HTTP {status}: {}", excerpt(body)))
        }
        s if s.is_server_error() => {
            FetchError::Transient(format!("HTTP {status}: {}", excerpt(body)))
        }
        _ => FetchError::Permanent(format!("HTTP {status}: {}", excerpt(body))),
    }
}

#[async_trait]
impl CatalogClient for TmdbClient {
    async fn fetch(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> std::result::Result<Value, FetchError> {
        let url = self.detail_url(content_type, external_id)?;

        self.pacer.acquire().await;

        let mut request = self.http.get(url);
        if let Credentials::Bearer(token) = &self.credentials {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, hint, &body);
            match &err {
                FetchError::RateLimited { retry_after } => {
                    warn!(
                        "Catalog throttled {content_type}:{external_id} (retry after {:?})",
                        retry_after
                    );
                }
                other => {
                    debug!("Fetch of {content_type}:{external_id} failed: {other}");
                }
            }
            return Err(err);
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice::<Value>(&bytes).map_err(|e| {
            FetchError::Permanent(format!(
                "undecodable {content_type} payload for {external_id}: {e}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: &str) -> TmdbConfig {
        TmdbConfig {
            api_key: Some(key.to_string()),
            api_base_url: "https://api.example.test/3".into(),
            ..TmdbConfig::default()
        }
    }

    #[test]
    fn status_codes_map_onto_the_error_taxonomy() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, None, ""),
            FetchError::NotFound
        );
        assert_eq!(
            classify_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(3)),
                ""
            ),
            FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, "upstream"),
            FetchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "{\"status_code\":7}"),
            FetchError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, ""),
            FetchError::Permanent(_)
        ));
    }

    #[test]
    fn retry_after_accepts_delta_seconds_only() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::RETRY_AFTER, header::HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            header::RETRY_AFTER,
            header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn detail_url_keeps_api_version_prefix() {
        let client = TmdbClient::new(&config("0123456789abcdef")).expect("client");
        let url = client.detail_url(ContentType::TvSeries, 1399).expect("url");
        assert_eq!(url.path(), "/3/tv/1399");
        let query = url.query().unwrap_or_default();
        assert!(query.contains("append_to_response=credits%2Cexternal_ids%2Ckeywords%2Csimilar"));
        assert!(query.contains("api_key=0123456789abcdef"));
    }

    #[test]
    fn v4_tokens_use_bearer_auth() {
        let client = TmdbClient::new(&config("eyJhbGciOiJIUzI1NiJ9.eyJhdWQiOiJ4In0.c2ln"))
            .expect("client");
        let url = client.detail_url(ContentType::Person, 287).expect("url");
        assert!(!url.query().unwrap_or_default().contains("api_key"));
        assert!(url.query().unwrap_or_default().contains("append_to_response=external_ids"));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let err = TmdbClient::new(&TmdbConfig::default()).expect_err("no key");
        assert!(matches!(err, IngestError::Config(_)));
    }
}
