use sqlx::{Postgres, QueryBuilder};

use crate::error::Result;
use crate::upsert::normalize::{
    CreatorRow, ExternalIdsRow, NormalizedSeries, SeasonRow, SeriesRow,
};

use super::shared::{
    Tx, company_ids, lookup_ids, persistence, replace_cast, replace_crew,
    replace_links, replace_similar, upsert_companies, upsert_credited_people,
    upsert_lookups,
};

const OWNER: &str = "tv_series_id";

pub(super) async fn persist_series(
    tx: &mut Tx<'_>,
    series: &NormalizedSeries,
) -> Result<()> {
    let id = series.series.id;

    upsert_series_row(tx, &series.series).await?;

    upsert_lookups(tx, "genres", &series.genres).await?;
    upsert_lookups(tx, "keywords", &series.keywords).await?;
    upsert_companies(tx, "production_companies", &series.companies).await?;
    upsert_companies(tx, "networks", &series.networks).await?;
    upsert_credited_people(tx, &series.credits.people).await?;

    replace_links(
        tx,
        "tv_series_genres",
        OWNER,
        id,
        "genre_id",
        &lookup_ids(&series.genres),
    )
    .await?;
    replace_links(
        tx,
        "tv_series_keywords",
        OWNER,
        id,
        "keyword_id",
        &lookup_ids(&series.keywords),
    )
    .await?;
    replace_links(
        tx,
        "tv_series_production_companies",
        OWNER,
        id,
        "company_id",
        &company_ids(&series.companies),
    )
    .await?;
    replace_links(
        tx,
        "tv_series_networks",
        OWNER,
        id,
        "network_id",
        &company_ids(&series.networks),
    )
    .await?;

    replace_creators(tx, id, &series.creators).await?;
    replace_seasons(tx, id, &series.seasons).await?;
    replace_cast(tx, "tv_series_cast", OWNER, id, &series.credits.cast).await?;
    replace_crew(tx, "tv_series_crew", OWNER, id, &series.credits.crew).await?;
    upsert_series_external_ids(tx, id, &series.external_ids).await?;
    replace_similar(
        tx,
        "similar_tv_series",
        OWNER,
        "similar_tv_series_id",
        id,
        &series.similar,
    )
    .await?;

    Ok(())
}

async fn upsert_series_row(tx: &mut Tx<'_>, series: &SeriesRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tv_series (
            id, name, original_name, original_language, overview, tagline,
            status, series_type, adult, homepage, in_production, first_air_date,
            last_air_date, number_of_episodes, number_of_seasons, popularity,
            vote_average, vote_count, poster_path, backdrop_path
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            original_name = EXCLUDED.original_name,
            original_language = EXCLUDED.original_language,
            overview = EXCLUDED.overview,
            tagline = EXCLUDED.tagline,
            status = EXCLUDED.status,
            series_type = EXCLUDED.series_type,
            adult = EXCLUDED.adult,
            homepage = EXCLUDED.homepage,
            in_production = EXCLUDED.in_production,
            first_air_date = EXCLUDED.first_air_date,
            last_air_date = EXCLUDED.last_air_date,
            number_of_episodes = EXCLUDED.number_of_episodes,
            number_of_seasons = EXCLUDED.number_of_seasons,
            popularity = EXCLUDED.popularity,
            vote_average = EXCLUDED.vote_average,
            vote_count = EXCLUDED.vote_count,
            poster_path = EXCLUDED.poster_path,
            backdrop_path = EXCLUDED.backdrop_path,
            updated_at = NOW()
        "#,
    )
    .bind(series.id)
    .bind(&series.name)
    .bind(&series.original_name)
    .bind(&series.original_language)
    .bind(&series.overview)
    .bind(&series.tagline)
    .bind(&series.status)
    .bind(&series.series_type)
    .bind(series.adult)
    .bind(&series.homepage)
    .bind(series.in_production)
    .bind(series.first_air_date)
    .bind(series.last_air_date)
    .bind(series.number_of_episodes)
    .bind(series.number_of_seasons)
    .bind(series.popularity)
    .bind(series.vote_average)
    .bind(series.vote_count)
    .bind(&series.poster_path)
    .bind(&series.backdrop_path)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!("failed to upsert tv series {}", series.id)))?;
    Ok(())
}

async fn replace_creators(
    tx: &mut Tx<'_>,
    series_id: i64,
    creators: &[CreatorRow],
) -> Result<()> {
    sqlx::query("DELETE FROM tv_series_creators WHERE tv_series_id = $1")
        .bind(series_id)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to clear tv series creators"))?;
    if creators.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO tv_series_creators (tv_series_id, person_id, credit_id) ",
    );
    qb.push_values(creators, |mut b, creator| {
        b.push_bind(series_id)
            .push_bind(creator.person_id)
            .push_bind(&creator.credit_id);
    });
    qb.push(" ON CONFLICT DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to insert tv series creators"))?;
    Ok(())
}

/// Seasons are owned by their series: the set is replaced wholesale, and a
/// season id that moved between series follows the latest owner.
async fn replace_seasons(
    tx: &mut Tx<'_>,
    series_id: i64,
    seasons: &[SeasonRow],
) -> Result<()> {
    sqlx::query("DELETE FROM tv_seasons WHERE tv_series_id = $1")
        .bind(series_id)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to clear tv seasons"))?;
    if seasons.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO tv_seasons (id, tv_series_id, season_number, name, overview, \
         air_date, episode_count, poster_path, vote_average) ",
    );
    qb.push_values(seasons, |mut b, season| {
        b.push_bind(season.id)
            .push_bind(series_id)
            .push_bind(season.season_number)
            .push_bind(&season.name)
            .push_bind(&season.overview)
            .push_bind(season.air_date)
            .push_bind(season.episode_count)
            .push_bind(&season.poster_path)
            .push_bind(season.vote_average);
    });
    qb.push(
        r#" ON CONFLICT (id) DO UPDATE SET
            tv_series_id = EXCLUDED.tv_series_id,
            season_number = EXCLUDED.season_number,
            name = EXCLUDED.name,
            overview = EXCLUDED.overview,
            air_date = EXCLUDED.air_date,
            episode_count = EXCLUDED.episode_count,
            poster_path = EXCLUDED.poster_path,
            vote_average = EXCLUDED.vote_average,
            updated_at = NOW()"#,
    );
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to insert tv seasons"))?;
    Ok(())
}

async fn upsert_series_external_ids(
    tx: &mut Tx<'_>,
    series_id: i64,
    ids: &ExternalIdsRow,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tv_series_external_ids (
            tv_series_id, imdb_id, tvdb_id, tvrage_id, wikidata_id,
            facebook_id, instagram_id, twitter_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (tv_series_id) DO UPDATE SET
            imdb_id = EXCLUDED.imdb_id,
            tvdb_id = EXCLUDED.tvdb_id,
            tvrage_id = EXCLUDED.tvrage_id,
            wikidata_id = EXCLUDED.wikidata_id,
            facebook_id = EXCLUDED.facebook_id,
            instagram_id = EXCLUDED.instagram_id,
            twitter_id = EXCLUDED.twitter_id,
            updated_at = NOW()
        "#,
    )
    .bind(series_id)
    .bind(&ids.imdb_id)
    .bind(&ids.tvdb_id)
    .bind(&ids.tvrage_id)
    .bind(&ids.wikidata_id)
    .bind(&ids.facebook_id)
    .bind(&ids.instagram_id)
    .bind(&ids.twitter_id)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!(
        "failed to upsert external ids for tv series {series_id}"
    )))?;
    Ok(())
}
