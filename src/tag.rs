use std::collections::HashMap;

use diesel::insert_into;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::serde::json::Json;
use serde::Serialize;

use crate::db::schema::{article_tags, tags};
use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    tags: Vec<String>,
}

#[get("/", format = "json")]
pub fn list(mut connection: DbConnection) -> ApiResult<TagsResponse> {
    let names = tags::table
        .select(tags::name)
        .order(tags::name.asc())
        .load::<String>(&mut *connection)?;
    Ok(Json(TagsResponse { tags: names }))
}

pub fn find_by_name(
    name: &str,
    connection: &mut PgConnection,
) -> Result<Option<i32>, ApiError> {
    tags::table
        .filter(tags::name.eq(name))
        .select(tags::id)
        .first::<i32>(connection)
        .optional()
        .map_err(|e| e.into())
}

/// Upserts each tag name and links it to the article. Existing links are
/// left alone, so re-linking is safe inside the create transaction.
pub fn link_tags(
    article: i32,
    names: &[String],
    connection: &mut PgConnection,
) -> Result<(), ApiError> {
    for name in names {
        insert_into(tags::table)
            .values(tags::name.eq(name))
            .on_conflict(tags::name)
            .do_nothing()
            .execute(connection)?;
        let tag_id = tags::table
            .filter(tags::name.eq(name))
            .select(tags::id)
            .first::<i32>(connection)?;
        insert_into(article_tags::table)
            .values((
                article_tags::article_id.eq(article),
                article_tags::tag_id.eq(tag_id),
            ))
            .on_conflict((article_tags::article_id, article_tags::tag_id))
            .do_nothing()
            .execute(connection)?;
    }
    Ok(())
}

pub fn tags_for_articles(
    ids: &[i32],
    connection: &mut PgConnection,
) -> Result<HashMap<i32, Vec<String>>, ApiError> {
    let rows = article_tags::table
        .inner_join(tags::table)
        .filter(article_tags::article_id.eq_any(ids.iter().copied()))
        .order(tags::name.asc())
        .select((article_tags::article_id, tags::name))
        .load::<(i32, String)>(connection)?;

    let mut map: HashMap<i32, Vec<String>> = HashMap::new();
    for (article, name) in rows {
        map.entry(article).or_default().push(name);
    }
    Ok(map)
}
