use crate::error::Result;
use crate::upsert::normalize::{ExternalIdsRow, MovieRow, NormalizedMovie};

use super::shared::{
    Tx, company_ids, lookup_ids, persistence, replace_cast, replace_code_links,
    replace_crew, replace_links, replace_similar, upsert_companies,
    upsert_countries, upsert_credited_people, upsert_languages, upsert_lookups,
};

pub(super) async fn persist_movie(
    tx: &mut Tx<'_>,
    movie: &NormalizedMovie,
) -> Result<()> {
    let id = movie.movie.id;

    upsert_movie_row(tx, &movie.movie).await?;

    upsert_lookups(tx, "genres", &movie.genres).await?;
    upsert_lookups(tx, "keywords", &movie.keywords).await?;
    upsert_companies(tx, "production_companies", &movie.companies).await?;
    upsert_countries(tx, &movie.countries).await?;
    upsert_languages(tx, &movie.languages).await?;
    upsert_credited_people(tx, &movie.credits.people).await?;

    replace_links(
        tx,
        "movie_genres",
        "movie_id",
        id,
        "genre_id",
        &lookup_ids(&movie.genres),
    )
    .await?;
    replace_links(
        tx,
        "movie_keywords",
        "movie_id",
        id,
        "keyword_id",
        &lookup_ids(&movie.keywords),
    )
    .await?;
    replace_links(
        tx,
        "movie_production_companies",
        "movie_id",
        id,
        "company_id",
        &company_ids(&movie.companies),
    )
    .await?;

    let countries: Vec<String> =
        movie.countries.iter().map(|c| c.iso_3166_1.clone()).collect();
    replace_code_links(
        tx,
        "movie_production_countries",
        "movie_id",
        id,
        "iso_3166_1",
        &countries,
    )
    .await?;
    let languages: Vec<String> =
        movie.languages.iter().map(|l| l.iso_639_1.clone()).collect();
    replace_code_links(
        tx,
        "movie_spoken_languages",
        "movie_id",
        id,
        "iso_639_1",
        &languages,
    )
    .await?;

    replace_cast(tx, "movie_cast", "movie_id", id, &movie.credits.cast).await?;
    replace_crew(tx, "movie_crew", "movie_id", id, &movie.credits.crew).await?;
    upsert_movie_external_ids(tx, id, &movie.external_ids).await?;
    replace_similar(
        tx,
        "similar_movies",
        "movie_id",
        "similar_movie_id",
        id,
        &movie.similar,
    )
    .await?;

    Ok(())
}

async fn upsert_movie_row(tx: &mut Tx<'_>, movie: &MovieRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO movies (
            id, imdb_id, title, original_title, original_language, overview,
            tagline, status, adult, video, homepage, budget, revenue, runtime,
            release_date, popularity, vote_average, vote_count, poster_path,
            backdrop_path
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20)
        ON CONFLICT (id) DO UPDATE SET
            imdb_id = EXCLUDED.imdb_id,
            title = EXCLUDED.title,
            original_title = EXCLUDED.original_title,
            original_language = EXCLUDED.original_language,
            overview = EXCLUDED.overview,
            tagline = EXCLUDED.tagline,
            status = EXCLUDED.status,
            adult = EXCLUDED.adult,
            video = EXCLUDED.video,
            homepage = EXCLUDED.homepage,
            budget = EXCLUDED.budget,
            revenue = EXCLUDED.revenue,
            runtime = EXCLUDED.runtime,
            release_date = EXCLUDED.release_date,
            popularity = EXCLUDED.popularity,
            vote_average = EXCLUDED.vote_average,
            vote_count = EXCLUDED.vote_count,
            poster_path = EXCLUDED.poster_path,
            backdrop_path = EXCLUDED.backdrop_path,
            updated_at = NOW()
        "#,
    )
    .bind(movie.id)
    .bind(&movie.imdb_id)
    .bind(&movie.title)
    .bind(&movie.original_title)
    .bind(&movie.original_language)
    .bind(&movie.overview)
    .bind(&movie.tagline)
    .bind(&movie.status)
    .bind(movie.adult)
    .bind(movie.video)
    .bind(&movie.homepage)
    .bind(movie.budget)
    .bind(movie.revenue)
    .bind(movie.runtime)
    .bind(movie.release_date)
    .bind(movie.popularity)
    .bind(movie.vote_average)
    .bind(movie.vote_count)
    .bind(&movie.poster_path)
    .bind(&movie.backdrop_path)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!("failed to upsert movie {}", movie.id)))?;
    Ok(())
}

async fn upsert_movie_external_ids(
    tx: &mut Tx<'_>,
    movie_id: i64,
    ids: &ExternalIdsRow,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO movie_external_ids (
            movie_id, imdb_id, wikidata_id, facebook_id, instagram_id, twitter_id
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (movie_id) DO UPDATE SET
            imdb_id = EXCLUDED.imdb_id,
            wikidata_id = EXCLUDED.wikidata_id,
            facebook_id = EXCLUDED.facebook_id,
            instagram_id = EXCLUDED.instagram_id,
            twitter_id = EXCLUDED.twitter_id,
            updated_at = NOW()
        "#,
    )
    .bind(movie_id)
    .bind(&ids.imdb_id)
    .bind(&ids.wikidata_id)
    .bind(&ids.facebook_id)
    .bind(&ids.instagram_id)
    .bind(&ids.twitter_id)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!(
        "failed to upsert external ids for movie {movie_id}"
    )))?;
    Ok(())
}
