use std::path::PathBuf;

use async_trait::async_trait;
use cinesync_model::ContentType;
use tracing::info;

use super::{ListingSource, decode_listing};
use crate::error::{IngestError, Result};

/// A local id list in export format (plain or gzipped) or one id per line.
/// The same file is returned for every content type it is asked about.
#[derive(Debug, Clone)]
pub struct FileListingSource {
    path: PathBuf,
}

impl FileListingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ListingSource for FileListingSource {
    async fn list_ids(&self, content_type: ContentType) -> Result<Vec<i64>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            IngestError::Listing(format!(
                "failed to read listing {}: {e}",
                self.path.display()
            ))
        })?;
        let ids = tokio::task::spawn_blocking(move || decode_listing(&bytes))
            .await
            .map_err(|e| IngestError::Listing(format!("listing decode task failed: {e}")))??;
        info!(
            "Listing file {} provided {} {content_type} ids",
            self.path.display(),
            ids.len()
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn reads_ids_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "{{\"id\":550}}").expect("write");
        writeln!(file, "{{\"id\":680}}").expect("write");

        let source = FileListingSource::new(file.path());
        let ids = source.list_ids(ContentType::Movie).await.expect("ids");
        assert_eq!(ids, vec![550, 680]);
    }

    #[tokio::test]
    async fn missing_file_is_a_listing_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = FileListingSource::new(dir.path().join("absent.json"));
        let err = source.list_ids(ContentType::Movie).await.expect_err("missing");
        assert!(matches!(err, IngestError::Listing(_)));
    }
}
