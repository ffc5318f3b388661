use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ModelError;

/// Catalog content types tracked by the ingestion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ContentType {
    Movie,
    TvSeries,
    Person,
}

impl ContentType {
    pub const ALL: [ContentType; 3] =
        [ContentType::Movie, ContentType::TvSeries, ContentType::Person];

    /// Value stored in `processing_state.content_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::TvSeries => "tv_series",
            ContentType::Person => "person",
        }
    }

    /// Path segment used by the catalog API (`/movie/{id}`, `/tv/{id}`).
    pub fn api_path(self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::TvSeries => "tv",
            ContentType::Person => "person",
        }
    }

    /// File prefix of the daily id export for this content type.
    pub fn export_prefix(self) -> &'static str {
        match self {
            ContentType::Movie => "movie_ids",
            ContentType::TvSeries => "tv_series_ids",
            ContentType::Person => "person_ids",
        }
    }
}

impl Display for ContentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" => Ok(ContentType::Movie),
            "tv_series" | "tv" | "series" => Ok(ContentType::TvSeries),
            "person" | "people" => Ok(ContentType::Person),
            other => Err(ModelError::UnknownContentType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storage_strings_and_aliases() {
        for ct in ContentType::ALL {
            assert_eq!(ct.as_str().parse::<ContentType>(), Ok(ct));
        }
        assert_eq!("TV".parse::<ContentType>(), Ok(ContentType::TvSeries));
        assert_eq!("people".parse::<ContentType>(), Ok(ContentType::Person));
        assert!("episode".parse::<ContentType>().is_err());
    }

    #[test]
    fn api_path_differs_from_storage_for_series() {
        assert_eq!(ContentType::TvSeries.api_path(), "tv");
        assert_eq!(ContentType::TvSeries.export_prefix(), "tv_series_ids");
    }
}
