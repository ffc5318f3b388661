//! Raw record shapes returned by the catalog API.
//!
//! Only the fields the ingestion engine consumes are modelled. Everything is
//! decoded leniently: scalars are optional, `null` collections decode as
//! empty, and identifier-like fields accept either strings or numbers. Turning
//! these into storable rows (trimming, defaults, validation) happens in the
//! core crate's normalization step.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts `"tt0137523"`, `81189`, `""` or `null`; numbers are rendered as text.
fn lenient_identifier<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Genre, keyword or similar `{id, name}` pair.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Production company or broadcast network.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompanyRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo_path: Option<String>,
    #[serde(default)]
    pub origin_country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CountryRef {
    pub iso_3166_1: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LanguageRef {
    pub iso_639_1: String,
    #[serde(default)]
    pub english_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CastCredit {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub credit_id: Option<String>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub gender: Option<i16>,
    #[serde(default)]
    pub adult: Option<bool>,
    #[serde(default)]
    pub known_for_department: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CrewCredit {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub credit_id: Option<String>,
    #[serde(default)]
    pub gender: Option<i16>,
    #[serde(default)]
    pub adult: Option<bool>,
    #[serde(default)]
    pub known_for_department: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Credits {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cast: Vec<CastCredit>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub crew: Vec<CrewCredit>,
}

/// Cross-references into other catalogs. Empty strings are kept here and
/// normalized to absent later.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExternalIdsRecord {
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub imdb_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub wikidata_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub facebook_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub instagram_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub twitter_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub tvdb_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub tvrage_id: Option<String>,
}

/// Movies wrap keywords as `{"keywords": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MovieKeywords {
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<NamedRef>,
}

/// Series wrap keywords as `{"results": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeriesKeywords {
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimilarRef {
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimilarPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<SimilarRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MovieRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub adult: Option<bool>,
    #[serde(default)]
    pub video: Option<bool>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub revenue: Option<i64>,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genres: Vec<NamedRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub production_companies: Vec<CompanyRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub production_countries: Vec<CountryRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spoken_languages: Vec<LanguageRef>,
    #[serde(default)]
    pub credits: Option<Credits>,
    #[serde(default)]
    pub external_ids: Option<ExternalIdsRecord>,
    #[serde(default)]
    pub keywords: Option<MovieKeywords>,
    #[serde(default)]
    pub similar: Option<SimilarPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CreatorRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub credit_id: Option<String>,
    #[serde(default)]
    pub gender: Option<i16>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeasonRecord {
    pub id: i64,
    #[serde(default)]
    pub season_number: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub air_date: Option<String>,
    #[serde(default)]
    pub episode_count: Option<i32>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeriesRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub series_type: Option<String>,
    #[serde(default)]
    pub adult: Option<bool>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub in_production: Option<bool>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub last_air_date: Option<String>,
    #[serde(default)]
    pub number_of_episodes: Option<i32>,
    #[serde(default)]
    pub number_of_seasons: Option<i32>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genres: Vec<NamedRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub production_companies: Vec<CompanyRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub networks: Vec<CompanyRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_by: Vec<CreatorRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seasons: Vec<SeasonRecord>,
    #[serde(default)]
    pub credits: Option<Credits>,
    #[serde(default)]
    pub external_ids: Option<ExternalIdsRecord>,
    #[serde(default)]
    pub keywords: Option<SeriesKeywords>,
    #[serde(default)]
    pub similar: Option<SimilarPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PersonRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub deathday: Option<String>,
    #[serde(default)]
    pub place_of_birth: Option<String>,
    #[serde(default)]
    pub gender: Option<i16>,
    #[serde(default)]
    pub adult: Option<bool>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default, deserialize_with = "lenient_identifier")]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub known_for_department: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub profile_path: Option<String>,
    #[serde(default)]
    pub external_ids: Option<ExternalIdsRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_fields_accept_numbers_and_null() {
        let ids: ExternalIdsRecord = serde_json::from_value(json!({
            "imdb_id": "tt0944947",
            "tvdb_id": 121361,
            "tvrage_id": null,
            "facebook_id": ""
        }))
        .expect("external ids decode");

        assert_eq!(ids.imdb_id.as_deref(), Some("tt0944947"));
        assert_eq!(ids.tvdb_id.as_deref(), Some("121361"));
        assert_eq!(ids.tvrage_id, None);
        assert_eq!(ids.facebook_id.as_deref(), Some(""));
        assert_eq!(ids.twitter_id, None);
    }

    #[test]
    fn null_collections_decode_as_empty() {
        let movie: MovieRecord = serde_json::from_value(json!({
            "id": 550,
            "title": "Fight Club",
            "genres": null,
            "credits": {"cast": null}
        }))
        .expect("movie decodes");

        assert!(movie.genres.is_empty());
        let credits = movie.credits.expect("credits present");
        assert!(credits.cast.is_empty());
        assert!(credits.crew.is_empty());
    }

    #[test]
    fn series_keywords_use_results_key() {
        let series: SeriesRecord = serde_json::from_value(json!({
            "id": 1399,
            "name": "Game of Thrones",
            "type": "Scripted",
            "keywords": {"results": [{"id": 6091, "name": "war"}]}
        }))
        .expect("series decodes");

        assert_eq!(series.series_type.as_deref(), Some("Scripted"));
        let keywords = series.keywords.expect("keywords present");
        assert_eq!(keywords.results.len(), 1);
        assert_eq!(keywords.results[0].id, 6091);
    }
}
