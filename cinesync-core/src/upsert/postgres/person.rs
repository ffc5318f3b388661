use crate::error::Result;
use crate::upsert::normalize::NormalizedPerson;

use super::shared::{Tx, persistence};

pub(super) async fn persist_person(
    tx: &mut Tx<'_>,
    person: &NormalizedPerson,
) -> Result<()> {
    let row = &person.person;
    sqlx::query(
        r#"
        INSERT INTO people (
            id, name, original_name, gender, adult, known_for_department,
            popularity, profile_path, biography, birthday, deathday,
            place_of_birth, homepage
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            original_name = COALESCE(EXCLUDED.original_name, people.original_name),
            gender = EXCLUDED.gender,
            adult = EXCLUDED.adult,
            known_for_department = EXCLUDED.known_for_department,
            popularity = EXCLUDED.popularity,
            profile_path = EXCLUDED.profile_path,
            biography = EXCLUDED.biography,
            birthday = EXCLUDED.birthday,
            deathday = EXCLUDED.deathday,
            place_of_birth = EXCLUDED.place_of_birth,
            homepage = EXCLUDED.homepage,
            updated_at = NOW()
        "#,
    )
    .bind(row.id)
    .bind(&row.name)
    .bind(&row.original_name)
    .bind(row.gender)
    .bind(row.adult)
    .bind(&row.known_for_department)
    .bind(row.popularity)
    .bind(&row.profile_path)
    .bind(&person.biography)
    .bind(person.birthday)
    .bind(person.deathday)
    .bind(&person.place_of_birth)
    .bind(&person.homepage)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!("failed to upsert person {}", row.id)))?;

    let ids = &person.external_ids;
    sqlx::query(
        r#"
        INSERT INTO person_external_ids (
            person_id, imdb_id, wikidata_id, facebook_id, instagram_id, twitter_id
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (person_id) DO UPDATE SET
            imdb_id = EXCLUDED.imdb_id,
            wikidata_id = EXCLUDED.wikidata_id,
            facebook_id = EXCLUDED.facebook_id,
            instagram_id = EXCLUDED.instagram_id,
            twitter_id = EXCLUDED.twitter_id,
            updated_at = NOW()
        "#,
    )
    .bind(row.id)
    .bind(&ids.imdb_id)
    .bind(&ids.wikidata_id)
    .bind(&ids.facebook_id)
    .bind(&ids.instagram_id)
    .bind(&ids.twitter_id)
    .execute(&mut **tx)
    .await
    .map_err(persistence(format!(
        "failed to upsert external ids for person {}",
        row.id
    )))?;

    Ok(())
}
