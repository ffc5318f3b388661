//! Sources of "every id the catalog currently knows about".

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use async_trait::async_trait;
use cinesync_model::ContentType;
use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::warn;

use crate::error::{IngestError, Result};

pub mod export;
pub mod file;

pub use export::DailyExportSource;
pub use file::FileListingSource;

#[async_trait]
pub trait ListingSource: Send + Sync + fmt::Debug {
    async fn list_ids(&self, content_type: ContentType) -> Result<Vec<i64>>;
}

/// Fixed id lists, keyed by content type.
#[derive(Debug, Clone, Default)]
pub struct StaticListingSource {
    ids: HashMap<ContentType, Vec<i64>>,
}

impl StaticListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, content_type: ContentType, ids: Vec<i64>) -> Self {
        self.ids.insert(content_type, ids);
        self
    }
}

#[async_trait]
impl ListingSource for StaticListingSource {
    async fn list_ids(&self, content_type: ContentType) -> Result<Vec<i64>> {
        Ok(self.ids.get(&content_type).cloned().unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct ExportLine {
    id: i64,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decode a listing payload: optionally gzipped, one JSON object with an
/// `id` per line or one bare id per line. Unparseable lines are skipped.
pub fn decode_listing(bytes: &[u8]) -> Result<Vec<i64>> {
    let text = if bytes.starts_with(&GZIP_MAGIC) {
        let mut text = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|e| IngestError::Listing(format!("corrupt gzip listing: {e}")))?;
        text
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    Ok(parse_listing_lines(&text))
}

fn parse_listing_lines(text: &str) -> Vec<i64> {
    let mut ids = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = if line.starts_with('{') {
            serde_json::from_str::<ExportLine>(line).ok().map(|l| l.id)
        } else {
            line.parse::<i64>().ok()
        };
        match parsed {
            Some(id) => ids.push(id),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {skipped} malformed listing lines");
    }
    ids
}
