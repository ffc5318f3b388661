//! Building blocks shared by the movie, series and person writers.
//!
//! Lookup entities (genres, keywords, companies, ...) are insert-if-new so hot
//! rows like "Drama" are never row-locked by concurrent items. People carry
//! changing aggregates and are updated, always in ascending id order.

use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::error::{IngestError, Result};
use crate::upsert::normalize::{
    CastRow, CompanyRow, CountryRow, CrewRow, LanguageRow, LookupRow, PersonRow,
};

pub(super) type Tx<'c> = Transaction<'c, Postgres>;

pub(super) fn persistence(
    context: impl Into<String>,
) -> impl FnOnce(sqlx::Error) -> IngestError {
    let context = context.into();
    move |e| IngestError::Persistence(format!("{context}: {e}"))
}

pub(super) async fn upsert_lookups(
    tx: &mut Tx<'_>,
    table: &str,
    rows: &[LookupRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new(format!("INSERT INTO {table} (id, name) "));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id).push_bind(&row.name);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence(format!("failed to upsert {table}")))?;
    Ok(())
}

pub(super) async fn upsert_companies(
    tx: &mut Tx<'_>,
    table: &str,
    rows: &[CompanyRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {table} (id, name, logo_path, origin_country) "
    ));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id)
            .push_bind(&row.name)
            .push_bind(&row.logo_path)
            .push_bind(&row.origin_country);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence(format!("failed to upsert {table}")))?;
    Ok(())
}

pub(super) async fn upsert_countries(
    tx: &mut Tx<'_>,
    rows: &[CountryRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("INSERT INTO production_countries (iso_3166_1, name) ");
    qb.push_values(rows, |mut b, row| {
        b.push_bind(&row.iso_3166_1).push_bind(&row.name);
    });
    qb.push(" ON CONFLICT (iso_3166_1) DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to upsert production countries"))?;
    Ok(())
}

pub(super) async fn upsert_languages(
    tx: &mut Tx<'_>,
    rows: &[LanguageRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO spoken_languages (iso_639_1, english_name, name) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(&row.iso_639_1)
            .push_bind(&row.english_name)
            .push_bind(&row.name);
    });
    qb.push(" ON CONFLICT (iso_639_1) DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to upsert spoken languages"))?;
    Ok(())
}

/// Upsert people seen in credit lists. Columns only a full person fetch
/// provides (biography, dates, ...) and `updated_at` are left alone.
pub(super) async fn upsert_credited_people(
    tx: &mut Tx<'_>,
    rows: &[PersonRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO people (id, name, original_name, gender, adult, \
         known_for_department, popularity, profile_path) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id)
            .push_bind(&row.name)
            .push_bind(&row.original_name)
            .push_bind(row.gender)
            .push_bind(row.adult)
            .push_bind(&row.known_for_department)
            .push_bind(row.popularity)
            .push_bind(&row.profile_path);
    });
    qb.push(
        r#" ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            original_name = COALESCE(EXCLUDED.original_name, people.original_name),
            gender = COALESCE(EXCLUDED.gender, people.gender),
            known_for_department = COALESCE(EXCLUDED.known_for_department, people.known_for_department),
            popularity = GREATEST(EXCLUDED.popularity, people.popularity),
            profile_path = COALESCE(EXCLUDED.profile_path, people.profile_path)"#,
    );
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence("failed to upsert credited people"))?;
    Ok(())
}

async fn clear_links(
    tx: &mut Tx<'_>,
    table: &str,
    owner_column: &str,
    owner_id: i64,
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {table} WHERE {owner_column} = $1"))
        .bind(owner_id)
        .execute(&mut **tx)
        .await
        .map_err(persistence(format!("failed to clear {table}")))?;
    Ok(())
}

/// Association replace for plain `(owner, related_id)` join tables.
pub(super) async fn replace_links(
    tx: &mut Tx<'_>,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    related_column: &str,
    related_ids: &[i64],
) -> Result<()> {
    clear_links(tx, table, owner_column, owner_id).await?;
    if related_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!(
        "INSERT INTO {table} ({owner_column}, {related_column}) \
         SELECT $1, related FROM UNNEST($2::BIGINT[]) AS links(related) \
         ON CONFLICT DO NOTHING"
    ))
    .bind(owner_id)
    .bind(related_ids)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!("failed to insert {table}")))?;
    Ok(())
}

/// Association replace for join tables keyed by an ISO code.
pub(super) async fn replace_code_links(
    tx: &mut Tx<'_>,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    code_column: &str,
    codes: &[String],
) -> Result<()> {
    clear_links(tx, table, owner_column, owner_id).await?;
    if codes.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!(
        "INSERT INTO {table} ({owner_column}, {code_column}) \
         SELECT $1, code FROM UNNEST($2::TEXT[]) AS links(code) \
         ON CONFLICT DO NOTHING"
    ))
    .bind(owner_id)
    .bind(codes)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!("failed to insert {table}")))?;
    Ok(())
}

pub(super) async fn replace_cast(
    tx: &mut Tx<'_>,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    rows: &[CastRow],
) -> Result<()> {
    clear_links(tx, table, owner_column, owner_id).await?;
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {table} ({owner_column}, person_id, character, cast_order, credit_id) "
    ));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(owner_id)
            .push_bind(row.person_id)
            .push_bind(&row.character)
            .push_bind(row.cast_order)
            .push_bind(&row.credit_id);
    });
    qb.push(" ON CONFLICT DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence(format!("failed to insert {table}")))?;
    Ok(())
}

pub(super) async fn replace_crew(
    tx: &mut Tx<'_>,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    rows: &[CrewRow],
) -> Result<()> {
    clear_links(tx, table, owner_column, owner_id).await?;
    if rows.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {table} ({owner_column}, person_id, department, job, credit_id) "
    ));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(owner_id)
            .push_bind(row.person_id)
            .push_bind(&row.department)
            .push_bind(&row.job)
            .push_bind(&row.credit_id);
    });
    qb.push(" ON CONFLICT DO NOTHING");
    qb.build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(persistence(format!("failed to insert {table}")))?;
    Ok(())
}

/// Similar titles keep upstream ranking; targets may not be ingested yet.
pub(super) async fn replace_similar(
    tx: &mut Tx<'_>,
    table: &str,
    owner_column: &str,
    similar_column: &str,
    owner_id: i64,
    similar_ids: &[i64],
) -> Result<()> {
    clear_links(tx, table, owner_column, owner_id).await?;
    if similar_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!(
        "INSERT INTO {table} ({owner_column}, {similar_column}, rank) \
         SELECT $1, similar, ord::INTEGER \
         FROM UNNEST($2::BIGINT[]) WITH ORDINALITY AS links(similar, ord) \
         ON CONFLICT DO NOTHING"
    ))
    .bind(owner_id)
    .bind(similar_ids)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!("failed to insert {table}")))?;
    Ok(())
}

pub(super) fn lookup_ids(rows: &[LookupRow]) -> Vec<i64> {
    rows.iter().map(|row| row.id).collect()
}

pub(super) fn company_ids(rows: &[CompanyRow]) -> Vec<i64> {
    rows.iter().map(|row| row.id).collect()
}
