//! Raw catalog record -> storable row set.
//!
//! Everything here is pure so the merge rules (trimming, defaults, dedupe,
//! caps) are testable without a database. Lookup rows are returned sorted by
//! key, which also gives every writer the same lock order.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use cinesync_model::{
    ContentType,
    records::{
        CastCredit, CompanyRef, CountryRef, CreatorRef, Credits, CrewCredit,
        ExternalIdsRecord, LanguageRef, MovieRecord, NamedRef, PersonRecord,
        SeasonRecord, SeriesRecord, SimilarPage,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, Result};

pub const CAST_LIMIT: usize = 50;
pub const CREW_LIMIT: usize = 100;
pub const SIMILAR_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyRow {
    pub id: i64,
    pub name: String,
    pub logo_path: Option<String>,
    pub origin_country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryRow {
    pub iso_3166_1: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageRow {
    pub iso_639_1: String,
    pub english_name: Option<String>,
    pub name: Option<String>,
}

/// Person columns visible from a credit list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonRow {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub gender: Option<i16>,
    pub adult: bool,
    pub known_for_department: Option<String>,
    pub popularity: f64,
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CastRow {
    pub person_id: i64,
    /// Empty when upstream gave none; part of the uniqueness key.
    pub character: String,
    pub cast_order: Option<i32>,
    pub credit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrewRow {
    pub person_id: i64,
    pub department: String,
    pub job: String,
    pub credit_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExternalIdsRow {
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub tvrage_id: Option<String>,
    pub wikidata_id: Option<String>,
    pub facebook_id: Option<String>,
    pub instagram_id: Option<String>,
    pub twitter_id: Option<String>,
}

/// People referenced by an entity plus the links pointing at them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreditRows {
    pub people: Vec<PersonRow>,
    pub cast: Vec<CastRow>,
    pub crew: Vec<CrewRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieRow {
    pub id: i64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub original_title: Option<String>,
    pub original_language: Option<String>,
    pub overview: Option<String>,
    pub tagline: Option<String>,
    pub status: Option<String>,
    pub adult: bool,
    pub video: bool,
    pub homepage: Option<String>,
    pub budget: i64,
    pub revenue: i64,
    pub runtime: Option<i32>,
    pub release_date: Option<NaiveDate>,
    pub popularity: f64,
    pub vote_average: f64,
    pub vote_count: i64,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMovie {
    pub movie: MovieRow,
    pub genres: Vec<LookupRow>,
    pub keywords: Vec<LookupRow>,
    pub companies: Vec<CompanyRow>,
    pub countries: Vec<CountryRow>,
    pub languages: Vec<LanguageRow>,
    pub credits: CreditRows,
    pub external_ids: ExternalIdsRow,
    pub similar: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub original_language: Option<String>,
    pub overview: Option<String>,
    pub tagline: Option<String>,
    pub status: Option<String>,
    pub series_type: Option<String>,
    pub adult: bool,
    pub homepage: Option<String>,
    pub in_production: bool,
    pub first_air_date: Option<NaiveDate>,
    pub last_air_date: Option<NaiveDate>,
    pub number_of_episodes: Option<i32>,
    pub number_of_seasons: Option<i32>,
    pub popularity: f64,
    pub vote_average: f64,
    pub vote_count: i64,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonRow {
    pub id: i64,
    pub season_number: i32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<NaiveDate>,
    pub episode_count: Option<i32>,
    pub poster_path: Option<String>,
    pub vote_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatorRow {
    pub person_id: i64,
    pub credit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSeries {
    pub series: SeriesRow,
    pub genres: Vec<LookupRow>,
    pub keywords: Vec<LookupRow>,
    pub companies: Vec<CompanyRow>,
    pub networks: Vec<CompanyRow>,
    pub creators: Vec<CreatorRow>,
    pub seasons: Vec<SeasonRow>,
    /// Includes creators so every linked person is upserted first.
    pub credits: CreditRows,
    pub external_ids: ExternalIdsRow,
    pub similar: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPerson {
    pub person: PersonRow,
    pub biography: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub deathday: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub homepage: Option<String>,
    pub external_ids: ExternalIdsRow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NormalizedRecord {
    Movie(NormalizedMovie),
    Series(NormalizedSeries),
    Person(NormalizedPerson),
}

impl NormalizedRecord {
    pub fn content_type(&self) -> ContentType {
        match self {
            NormalizedRecord::Movie(_) => ContentType::Movie,
            NormalizedRecord::Series(_) => ContentType::TvSeries,
            NormalizedRecord::Person(_) => ContentType::Person,
        }
    }
}

/// Validate and coerce a raw record fetched for `(content_type, external_id)`.
pub fn normalize(
    content_type: ContentType,
    external_id: i64,
    raw: &Value,
) -> Result<NormalizedRecord> {
    match content_type {
        ContentType::Movie => {
            let record = decode::<MovieRecord>(content_type, raw)?;
            normalize_movie(external_id, record).map(NormalizedRecord::Movie)
        }
        ContentType::TvSeries => {
            let record = decode::<SeriesRecord>(content_type, raw)?;
            normalize_series(external_id, record).map(NormalizedRecord::Series)
        }
        ContentType::Person => {
            let record = decode::<PersonRecord>(content_type, raw)?;
            normalize_person(external_id, record).map(NormalizedRecord::Person)
        }
    }
}

fn decode<'a, T: Deserialize<'a>>(
    content_type: ContentType,
    raw: &'a Value,
) -> Result<T> {
    T::deserialize(raw).map_err(|e| {
        IngestError::Validation(format!("malformed {content_type} record: {e}"))
    })
}

fn check_id(
    content_type: ContentType,
    expected: i64,
    actual: Option<i64>,
) -> Result<()> {
    match actual {
        Some(id) if id == expected => Ok(()),
        Some(id) => Err(IngestError::Validation(format!(
            "{content_type} record id {id} does not match requested id {expected}"
        ))),
        None => Err(IngestError::Validation(format!(
            "{content_type} record {expected} has no id"
        ))),
    }
}

fn required_text(
    content_type: ContentType,
    external_id: i64,
    field: &str,
    value: Option<String>,
) -> Result<String> {
    clean(value).ok_or_else(|| {
        IngestError::Validation(format!(
            "{content_type} {external_id} has no {field}"
        ))
    })
}

/// Trimmed text, with empty strings treated as absent.
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    clean(value).and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn non_negative(value: Option<i64>) -> i64 {
    value.unwrap_or(0).max(0)
}

fn lookups(refs: Vec<NamedRef>) -> Vec<LookupRow> {
    let mut by_id = BTreeMap::new();
    for named in refs {
        if let Some(name) = clean(named.name) {
            by_id.entry(named.id).or_insert(LookupRow { id: named.id, name });
        }
    }
    by_id.into_values().collect()
}

fn companies(refs: Vec<CompanyRef>) -> Vec<CompanyRow> {
    let mut by_id = BTreeMap::new();
    for company in refs {
        if let Some(name) = clean(company.name) {
            by_id.entry(company.id).or_insert(CompanyRow {
                id: company.id,
                name,
                logo_path: clean(company.logo_path),
                origin_country: clean(company.origin_country),
            });
        }
    }
    by_id.into_values().collect()
}

fn countries(refs: Vec<CountryRef>) -> Vec<CountryRow> {
    let mut by_code = BTreeMap::new();
    for country in refs {
        let Some(code) = clean(Some(country.iso_3166_1)) else {
            continue;
        };
        let name = clean(country.name).unwrap_or_else(|| code.clone());
        by_code.entry(code.clone()).or_insert(CountryRow {
            iso_3166_1: code,
            name,
        });
    }
    by_code.into_values().collect()
}

fn languages(refs: Vec<LanguageRef>) -> Vec<LanguageRow> {
    let mut by_code = BTreeMap::new();
    for language in refs {
        let Some(code) = clean(Some(language.iso_639_1)) else {
            continue;
        };
        by_code.entry(code.clone()).or_insert(LanguageRow {
            iso_639_1: code,
            english_name: clean(language.english_name),
            name: clean(language.name),
        });
    }
    by_code.into_values().collect()
}

fn external_ids(record: Option<ExternalIdsRecord>) -> ExternalIdsRow {
    let record = record.unwrap_or_default();
    ExternalIdsRow {
        imdb_id: clean(record.imdb_id),
        tvdb_id: clean(record.tvdb_id),
        tvrage_id: clean(record.tvrage_id),
        wikidata_id: clean(record.wikidata_id),
        facebook_id: clean(record.facebook_id),
        instagram_id: clean(record.instagram_id),
        twitter_id: clean(record.twitter_id),
    }
}

fn similar(page: Option<SimilarPage>, own_id: i64) -> Vec<i64> {
    let mut seen = HashSet::new();
    page.map(|p| p.results)
        .unwrap_or_default()
        .into_iter()
        .map(|similar| similar.id)
        .filter(|id| *id != own_id && seen.insert(*id))
        .take(SIMILAR_LIMIT)
        .collect()
}

#[derive(Default)]
struct PeopleCollector {
    by_id: BTreeMap<i64, PersonRow>,
}

impl PeopleCollector {
    /// Returns false when the person cannot be stored (no name).
    fn add(
        &mut self,
        id: i64,
        name: Option<String>,
        build: impl FnOnce(String) -> PersonRow,
    ) -> bool {
        if self.by_id.contains_key(&id) {
            return true;
        }
        match clean(name) {
            Some(name) => {
                self.by_id.insert(id, build(name));
                true
            }
            None => false,
        }
    }

    fn finish(self) -> Vec<PersonRow> {
        self.by_id.into_values().collect()
    }
}

fn cast_person(credit: &CastCredit, name: String) -> PersonRow {
    PersonRow {
        id: credit.id,
        name,
        original_name: clean(credit.original_name.clone()),
        gender: credit.gender,
        adult: credit.adult.unwrap_or(false),
        known_for_department: clean(credit.known_for_department.clone()),
        popularity: finite_or_zero(credit.popularity),
        profile_path: clean(credit.profile_path.clone()),
    }
}

fn crew_person(credit: &CrewCredit, name: String) -> PersonRow {
    PersonRow {
        id: credit.id,
        name,
        original_name: clean(credit.original_name.clone()),
        gender: credit.gender,
        adult: credit.adult.unwrap_or(false),
        known_for_department: clean(credit.known_for_department.clone()),
        popularity: finite_or_zero(credit.popularity),
        profile_path: clean(credit.profile_path.clone()),
    }
}

fn creator_person(creator: &CreatorRef, name: String) -> PersonRow {
    PersonRow {
        id: creator.id,
        name,
        original_name: clean(creator.original_name.clone()),
        gender: creator.gender,
        adult: false,
        known_for_department: None,
        popularity: 0.0,
        profile_path: clean(creator.profile_path.clone()),
    }
}

/// Caps apply to stored rows: duplicate and nameless credits are skipped
/// without using up a slot, so a list padded with them still yields the
/// first `CAST_LIMIT` / `CREW_LIMIT` usable credits.
fn credit_rows(
    credits: Option<Credits>,
    people: &mut PeopleCollector,
) -> (Vec<CastRow>, Vec<CrewRow>) {
    let credits = credits.unwrap_or_default();

    let mut cast_keys = HashSet::new();
    let mut cast = Vec::new();
    for credit in &credits.cast {
        if cast.len() == CAST_LIMIT {
            break;
        }
        let character = clean(credit.character.clone()).unwrap_or_default();
        if !cast_keys.insert((credit.id, character.clone())) {
            continue;
        }
        if !people.add(credit.id, credit.name.clone(), |name| {
            cast_person(credit, name)
        }) {
            continue;
        }
        cast.push(CastRow {
            person_id: credit.id,
            character,
            cast_order: credit.order,
            credit_id: clean(credit.credit_id.clone()),
        });
    }

    let mut crew_keys = HashSet::new();
    let mut crew = Vec::new();
    for credit in &credits.crew {
        if crew.len() == CREW_LIMIT {
            break;
        }
        let department = clean(credit.department.clone()).unwrap_or_default();
        let job = clean(credit.job.clone()).unwrap_or_default();
        if !crew_keys.insert((credit.id, department.clone(), job.clone())) {
            continue;
        }
        if !people.add(credit.id, credit.name.clone(), |name| {
            crew_person(credit, name)
        }) {
            continue;
        }
        crew.push(CrewRow {
            person_id: credit.id,
            department,
            job,
            credit_id: clean(credit.credit_id.clone()),
        });
    }

    (cast, crew)
}

pub fn normalize_movie(
    external_id: i64,
    record: MovieRecord,
) -> Result<NormalizedMovie> {
    let ct = ContentType::Movie;
    check_id(ct, external_id, record.id)?;
    let title = required_text(ct, external_id, "title", record.title)?;
    let external = external_ids(record.external_ids);

    let mut people = PeopleCollector::default();
    let (cast, crew) = credit_rows(record.credits, &mut people);

    Ok(NormalizedMovie {
        movie: MovieRow {
            id: external_id,
            imdb_id: clean(record.imdb_id).or_else(|| external.imdb_id.clone()),
            title,
            original_title: clean(record.original_title),
            original_language: clean(record.original_language),
            overview: clean(record.overview),
            tagline: clean(record.tagline),
            status: clean(record.status),
            adult: record.adult.unwrap_or(false),
            video: record.video.unwrap_or(false),
            homepage: clean(record.homepage),
            budget: non_negative(record.budget),
            revenue: non_negative(record.revenue),
            runtime: record.runtime,
            release_date: parse_date(record.release_date),
            popularity: finite_or_zero(record.popularity),
            vote_average: finite_or_zero(record.vote_average),
            vote_count: non_negative(record.vote_count),
            poster_path: clean(record.poster_path),
            backdrop_path: clean(record.backdrop_path),
        },
        genres: lookups(record.genres),
        keywords: lookups(record.keywords.map(|k| k.keywords).unwrap_or_default()),
        companies: companies(record.production_companies),
        countries: countries(record.production_countries),
        languages: languages(record.spoken_languages),
        credits: CreditRows {
            people: people.finish(),
            cast,
            crew,
        },
        external_ids: external,
        similar: similar(record.similar, external_id),
    })
}

fn seasons(records: Vec<SeasonRecord>) -> Vec<SeasonRow> {
    let mut by_id = BTreeMap::new();
    for season in records {
        let Some(season_number) = season.season_number else {
            continue;
        };
        by_id.entry(season.id).or_insert(SeasonRow {
            id: season.id,
            season_number,
            name: clean(season.name),
            overview: clean(season.overview),
            air_date: parse_date(season.air_date),
            episode_count: season.episode_count,
            poster_path: clean(season.poster_path),
            vote_average: finite_or_zero(season.vote_average),
        });
    }
    by_id.into_values().collect()
}

pub fn normalize_series(
    external_id: i64,
    record: SeriesRecord,
) -> Result<NormalizedSeries> {
    let ct = ContentType::TvSeries;
    check_id(ct, external_id, record.id)?;
    let name = required_text(ct, external_id, "name", record.name)?;

    let mut people = PeopleCollector::default();
    let mut creator_ids = HashSet::new();
    let mut creators = Vec::new();
    for creator in &record.created_by {
        if !creator_ids.insert(creator.id) {
            continue;
        }
        if people.add(creator.id, creator.name.clone(), |name| {
            creator_person(creator, name)
        }) {
            creators.push(CreatorRow {
                person_id: creator.id,
                credit_id: clean(creator.credit_id.clone()),
            });
        }
    }
    let (cast, crew) = credit_rows(record.credits, &mut people);

    Ok(NormalizedSeries {
        series: SeriesRow {
            id: external_id,
            name,
            original_name: clean(record.original_name),
            original_language: clean(record.original_language),
            overview: clean(record.overview),
            tagline: clean(record.tagline),
            status: clean(record.status),
            series_type: clean(record.series_type),
            adult: record.adult.unwrap_or(false),
            homepage: clean(record.homepage),
            in_production: record.in_production.unwrap_or(false),
            first_air_date: parse_date(record.first_air_date),
            last_air_date: parse_date(record.last_air_date),
            number_of_episodes: record.number_of_episodes,
            number_of_seasons: record.number_of_seasons,
            popularity: finite_or_zero(record.popularity),
            vote_average: finite_or_zero(record.vote_average),
            vote_count: non_negative(record.vote_count),
            poster_path: clean(record.poster_path),
            backdrop_path: clean(record.backdrop_path),
        },
        genres: lookups(record.genres),
        keywords: lookups(record.keywords.map(|k| k.results).unwrap_or_default()),
        companies: companies(record.production_companies),
        networks: companies(record.networks),
        creators,
        seasons: seasons(record.seasons),
        credits: CreditRows {
            people: people.finish(),
            cast,
            crew,
        },
        external_ids: external_ids(record.external_ids),
        similar: similar(record.similar, external_id),
    })
}

pub fn normalize_person(
    external_id: i64,
    record: PersonRecord,
) -> Result<NormalizedPerson> {
    let ct = ContentType::Person;
    check_id(ct, external_id, record.id)?;
    let name = required_text(ct, external_id, "name", record.name)?;

    let mut external = external_ids(record.external_ids);
    if external.imdb_id.is_none() {
        external.imdb_id = clean(record.imdb_id);
    }

    Ok(NormalizedPerson {
        person: PersonRow {
            id: external_id,
            name,
            original_name: None,
            gender: record.gender,
            adult: record.adult.unwrap_or(false),
            known_for_department: clean(record.known_for_department),
            popularity: finite_or_zero(record.popularity),
            profile_path: clean(record.profile_path),
        },
        biography: clean(record.biography),
        birthday: parse_date(record.birthday),
        deathday: parse_date(record.deathday),
        place_of_birth: clean(record.place_of_birth),
        homepage: clean(record.homepage),
        external_ids: external,
    })
}
