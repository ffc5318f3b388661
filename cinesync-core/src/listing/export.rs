use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use cinesync_model::ContentType;
use reqwest::Client;
use tracing::info;
use url::Url;

use super::{ListingSource, decode_listing};
use crate::config::TmdbConfig;
use crate::error::{IngestError, Result};
use crate::providers::tmdb::directory_url;

/// The catalog's daily id dumps
/// (`{base}/movie_ids_MM_DD_YYYY.json.gz` and friends).
pub struct DailyExportSource {
    http: Client,
    base_url: Url,
    date: Option<NaiveDate>,
}

impl fmt::Debug for DailyExportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DailyExportSource")
            .field("base_url", &self.base_url.as_str())
            .field("date", &self.date)
            .finish()
    }
}

impl DailyExportSource {
    pub fn new(config: &TmdbConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("cinesync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                IngestError::Config(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            base_url: directory_url(&config.export_base_url)?,
            date: None,
        })
    }

    /// Pin the export date instead of using yesterday's file.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Today's export is published late in the day, so default to yesterday.
    pub fn effective_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| {
            let today = Utc::now().date_naive();
            today.checked_sub_days(Days::new(1)).unwrap_or(today)
        })
    }

    pub fn export_url(&self, content_type: ContentType, date: NaiveDate) -> Result<Url> {
        let file = format!(
            "{}_{}.json.gz",
            content_type.export_prefix(),
            date.format("%m_%d_%Y")
        );
        self.base_url
            .join(&file)
            .map_err(|e| IngestError::Listing(format!("invalid export url: {e}")))
    }
}

#[async_trait]
impl ListingSource for DailyExportSource {
    async fn list_ids(&self, content_type: ContentType) -> Result<Vec<i64>> {
        let url = self.export_url(content_type, self.effective_date())?;
        info!("Downloading {content_type} id export from {url}");

        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            IngestError::Listing(format!("failed to download {url}: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Listing(format!(
                "export download {url} returned HTTP {status}"
            )));
        }
        let bytes = response.bytes().await.map_err(|e| {
            IngestError::Listing(format!("failed to read {url}: {e}"))
        })?;

        let ids = tokio::task::spawn_blocking(move || decode_listing(&bytes))
            .await
            .map_err(|e| IngestError::Listing(format!("export decode task failed: {e}")))??;
        info!("Export listed {} {content_type} ids", ids.len());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_file_names_use_month_day_year() {
        let source = DailyExportSource::new(&TmdbConfig::default()).expect("source");
        let date = NaiveDate::from_ymd_opt(2024, 5, 7).expect("date");

        let url = source.export_url(ContentType::TvSeries, date).expect("url");
        assert_eq!(
            url.as_str(),
            "https://files.tmdb.org/p/exports/tv_series_ids_05_07_2024.json.gz"
        );
    }

    #[test]
    fn default_date_is_yesterday() {
        let source = DailyExportSource::new(&TmdbConfig::default()).expect("source");
        let yesterday = Utc::now().date_naive() - chrono::Duration::days(1);
        // Guard against the test straddling midnight.
        let effective = source.effective_date();
        assert!(effective == yesterday || effective == yesterday + chrono::Duration::days(1));

        let pinned = NaiveDate::from_ymd_opt(2023, 1, 2).expect("date");
        assert_eq!(source.with_date(pinned).effective_date(), pinned);
    }
}
