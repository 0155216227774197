use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, exists};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into, select, update as diesel_update};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use slug::slugify;

use crate::db::schema::{articles, favorites, follows, users};
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::tag;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, PartialEq, Identifiable, Queryable)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn load_by_slug(slug_: &str, connection: &mut PgConnection) -> Result<Article, ApiError> {
        use crate::db::schema::articles::dsl::*;
        articles
            .filter(slug.eq(slug_))
            .get_result::<Article>(connection)
            .map_err(|e| e.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ArticleResponse {
    article: ArticleView,
}

#[derive(Debug, Serialize)]
pub struct ArticlesResponse {
    articles: Vec<ArticleView>,
    #[serde(rename = "articlesCount")]
    articles_count: i64,
}

/// An article as the client sees it: tags joined in, favorite state relative
/// to the viewer, author embedded as a profile.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    slug: String,
    title: String,
    description: String,
    body: String,
    tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
    favorited: bool,
    favorites_count: i64,
    author: Profile<'static>,
}

impl ArticleView {
    fn from(
        article: Article,
        author: Profile<'static>,
        tag_list: Vec<String>,
        favorited: bool,
        favorites_count: i64,
    ) -> Self {
        // A never-updated article reports its creation time as updatedAt.
        let updated_at = article.updated_at.unwrap_or(article.created_at);
        ArticleView {
            slug: article.slug,
            title: article.title,
            description: article.description,
            body: article.body,
            tag_list,
            created_at: article.created_at,
            updated_at,
            favorited,
            favorites_count,
            author,
        }
    }
}

/// Resolves viewer-relative state for a page of articles with one batched
/// query per concern instead of a per-row join.
pub fn load_views(
    page: Vec<Article>,
    viewer: Option<&User>,
    connection: &mut PgConnection,
) -> Result<Vec<ArticleView>, ApiError> {
    let ids: Vec<i32> = page.iter().map(|a| a.id).collect();
    let author_ids: Vec<i32> = page.iter().map(|a| a.author_id).collect();

    let authors: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(author_ids.iter().copied()))
        .load::<User>(connection)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let mut tag_lists = tag::tags_for_articles(&ids, connection)?;

    let counts: HashMap<i32, i64> = favorites::table
        .filter(favorites::article_id.eq_any(ids.iter().copied()))
        .group_by(favorites::article_id)
        .select((favorites::article_id, count_star()))
        .load::<(i32, i64)>(connection)?
        .into_iter()
        .collect();

    let favorited_by_viewer: HashSet<i32> = match viewer {
        Some(user) => favorites::table
            .filter(favorites::user_id.eq(user.id))
            .filter(favorites::article_id.eq_any(ids.iter().copied()))
            .select(favorites::article_id)
            .load::<i32>(connection)?
            .into_iter()
            .collect(),
        None => HashSet::new(),
    };

    let followed_authors: HashSet<i32> = match viewer {
        Some(user) => follows::table
            .filter(follows::follower_id.eq(user.id))
            .filter(follows::followee_id.eq_any(author_ids.iter().copied()))
            .select(follows::followee_id)
            .load::<i32>(connection)?
            .into_iter()
            .collect(),
        None => HashSet::new(),
    };

    page.into_iter()
        .map(|article| {
            let author = authors.get(&article.author_id).ok_or(ApiError::Internal)?;
            let profile = author.profile(followed_authors.contains(&author.id));
            let tag_list = tag_lists.remove(&article.id).unwrap_or_default();
            let favorited = favorited_by_viewer.contains(&article.id);
            let favorites_count = counts.get(&article.id).copied().unwrap_or(0);
            Ok(ArticleView::from(
                article,
                profile,
                tag_list,
                favorited,
                favorites_count,
            ))
        })
        .collect()
}

fn load_view(
    article: Article,
    viewer: Option<&User>,
    connection: &mut PgConnection,
) -> Result<ArticleView, ApiError> {
    load_views(vec![article], viewer, connection)?
        .pop()
        .ok_or(ApiError::Internal)
}

#[derive(Debug, Insertable)]
#[diesel(table_name = articles)]
pub struct NewArticle {
    author_id: i32,
    slug: String,
    title: String,
    description: String,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleDetails {
    title: String,
    description: String,
    body: String,
    #[serde(rename = "tagList", default)]
    tag_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateArticle {
    article: ArticleDetails,
}

impl Validate for CreateArticle {
    type Error = ValidationError;
    fn validate(self, _connection: &mut PgConnection) -> Result<Self, ValidationError> {
        let mut error = ValidationError::default();
        if self.article.body.trim().is_empty() {
            error.add_error("body", "empty body");
        }

        if self.article.title.trim().is_empty() {
            error.add_error("title", "empty title");
        }

        if self.article.description.trim().is_empty() {
            error.add_error("description", "empty description");
        }

        if error.empty() {
            Ok(self)
        } else {
            Err(error)
        }
    }
}

fn dedup_tags(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[post("/", format = "json", data = "<create>")]
pub fn create(
    mut connection: DbConnection,
    current_user: CurrentUser,
    create: Json<CreateArticle>,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let create = create.validate(&mut connection)?.into_inner();
    let tag_list = dedup_tags(create.article.tag_list);
    let new_article = NewArticle {
        author_id: user.id,
        slug: slugify(&create.article.title),
        title: create.article.title,
        description: create.article.description,
        body: create.article.body,
        created_at: Utc::now(),
        updated_at: None,
    };

    // Slug uniqueness is the database's to enforce. A duplicate title
    // surfaces as a unique violation, reported as a 400.
    let article = connection.transaction::<Article, ApiError, _>(|conn| {
        let article = insert_into(articles::table)
            .values(&new_article)
            .get_result::<Article>(conn)?;
        tag::link_tags(article.id, &tag_list, conn)?;
        Ok(article)
    })?;

    let view = ArticleView::from(article, user.profile(false), tag_list, false, 0);
    Ok(Json(ArticleResponse { article: view }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDetails {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    article: UpdateDetails,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = articles)]
struct ArticleChanges {
    slug: Option<String>,
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    updated_at: DateTime<Utc>,
}

#[put("/<slug>", format = "json", data = "<update>")]
pub fn update(
    slug: &str,
    mut connection: DbConnection,
    current_user: CurrentUser,
    update: Json<UpdateArticle>,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = Article::load_by_slug(slug, &mut connection)?;
    if article.author_id != user.id {
        return Err(ApiError::Forbidden);
    }

    let update = update.into_inner().article;
    // A retitled article gets a fresh slug.
    let new_slug = update.title.as_deref().map(slugify);
    let changes = ArticleChanges {
        slug: new_slug,
        title: update.title,
        description: update.description,
        body: update.body,
        updated_at: Utc::now(),
    };
    let article = diesel_update(articles::table.find(article.id))
        .set(&changes)
        .get_result::<Article>(&mut *connection)?;

    let view = load_view(article, Some(&user), &mut connection)?;
    Ok(Json(ArticleResponse { article: view }))
}

#[delete("/<slug>", format = "json")]
pub fn delete(
    slug: &str,
    mut connection: DbConnection,
    current_user: CurrentUser,
) -> ApiResult<serde_json::Value> {
    let user = current_user?;
    let article = Article::load_by_slug(slug, &mut connection)?;
    if article.author_id != user.id {
        return Err(ApiError::Forbidden);
    }

    // Comments, favorites, and tag links go with it (ON DELETE CASCADE).
    diesel_delete(articles::table.find(article.id)).execute(&mut *connection)?;
    Ok(Json(serde_json::json!({})))
}

#[get("/<slug>", format = "json", rank = 2)]
pub fn get(
    slug: &str,
    mut connection: DbConnection,
    current_user: Option<User>,
) -> ApiResult<ArticleResponse> {
    let article = Article::load_by_slug(slug, &mut connection)?;
    let view = load_view(article, current_user.as_ref(), &mut connection)?;
    Ok(Json(ArticleResponse { article: view }))
}

fn filtered(
    author_id: Option<i32>,
    tag_id: Option<i32>,
    favoriter_id: Option<i32>,
) -> articles::BoxedQuery<'static, Pg> {
    use crate::db::schema::article_tags;

    let mut query = articles::table.into_boxed();
    if let Some(author) = author_id {
        query = query.filter(articles::author_id.eq(author));
    }
    if let Some(tag) = tag_id {
        query = query.filter(
            articles::id.eq_any(
                article_tags::table
                    .filter(article_tags::tag_id.eq(tag))
                    .select(article_tags::article_id),
            ),
        );
    }
    if let Some(favoriter) = favoriter_id {
        query = query.filter(
            articles::id.eq_any(
                favorites::table
                    .filter(favorites::user_id.eq(favoriter))
                    .select(favorites::article_id),
            ),
        );
    }
    query
}

fn page_limits(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

fn user_id_by_name(name: &str, connection: &mut PgConnection) -> Result<Option<i32>, ApiError> {
    users::table
        .filter(users::username.eq(name))
        .select(users::id)
        .first::<i32>(connection)
        .optional()
        .map_err(|e| e.into())
}

#[get("/?<tag>&<author>&<favorited>&<limit>&<offset>", format = "json")]
pub fn list(
    mut connection: DbConnection,
    current_user: Option<User>,
    tag: Option<String>,
    author: Option<String>,
    favorited: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<ArticlesResponse> {
    let empty = ArticlesResponse {
        articles: Vec::new(),
        articles_count: 0,
    };

    // Filters naming unknown users or tags match nothing.
    let author_id = match author {
        Some(name) => match user_id_by_name(&name, &mut connection)? {
            Some(id) => Some(id),
            None => return Ok(Json(empty)),
        },
        None => None,
    };
    let favoriter_id = match favorited {
        Some(name) => match user_id_by_name(&name, &mut connection)? {
            Some(id) => Some(id),
            None => return Ok(Json(empty)),
        },
        None => None,
    };
    let tag_id = match tag {
        Some(name) => match tag::find_by_name(&name, &mut connection)? {
            Some(id) => Some(id),
            None => return Ok(Json(empty)),
        },
        None => None,
    };

    let total = filtered(author_id, tag_id, favoriter_id)
        .count()
        .get_result::<i64>(&mut *connection)?;
    let (limit, offset) = page_limits(limit, offset);
    let page = filtered(author_id, tag_id, favoriter_id)
        .order(articles::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load::<Article>(&mut *connection)?;

    let articles = load_views(page, current_user.as_ref(), &mut connection)?;
    Ok(Json(ArticlesResponse {
        articles,
        articles_count: total,
    }))
}

#[get("/feed?<limit>&<offset>", format = "json")]
pub fn feed(
    mut connection: DbConnection,
    current_user: CurrentUser,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<ArticlesResponse> {
    let user = current_user?;
    let followed = follows::table
        .filter(follows::follower_id.eq(user.id))
        .select(follows::followee_id);

    let total = articles::table
        .filter(articles::author_id.eq_any(followed))
        .count()
        .get_result::<i64>(&mut *connection)?;
    let (limit, offset) = page_limits(limit, offset);
    let followed = follows::table
        .filter(follows::follower_id.eq(user.id))
        .select(follows::followee_id);
    let page = articles::table
        .filter(articles::author_id.eq_any(followed))
        .order(articles::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load::<Article>(&mut *connection)?;

    let articles = load_views(page, Some(&user), &mut connection)?;
    Ok(Json(ArticlesResponse {
        articles,
        articles_count: total,
    }))
}

#[post("/<slug>/favorite", format = "json")]
pub fn favorite(
    slug: &str,
    mut connection: DbConnection,
    current_user: CurrentUser,
) -> ApiResult<ArticleResponse> {
    use crate::db::schema::favorites::dsl::*;

    let user = current_user?;
    let article = Article::load_by_slug(slug, &mut connection)?;

    // Favoriting twice is an invalid state. Races fall through to the
    // unique pair constraint, which reports the same 400.
    let already = select(exists(
        favorites
            .filter(user_id.eq(user.id))
            .filter(article_id.eq(article.id)),
    ))
    .get_result::<bool>(&mut *connection)?;
    if already {
        return Err(ValidationError::from("article", "already favorited").into());
    }

    insert_into(favorites)
        .values((user_id.eq(user.id), article_id.eq(article.id)))
        .execute(&mut *connection)?;

    let view = load_view(article, Some(&user), &mut connection)?;
    Ok(Json(ArticleResponse { article: view }))
}

#[delete("/<slug>/favorite", format = "json")]
pub fn unfavorite(
    slug: &str,
    mut connection: DbConnection,
    current_user: CurrentUser,
) -> ApiResult<ArticleResponse> {
    use crate::db::schema::favorites::dsl::*;

    let user = current_user?;
    let article = Article::load_by_slug(slug, &mut connection)?;

    let deleted = diesel_delete(
        favorites
            .filter(user_id.eq(user.id))
            .filter(article_id.eq(article.id)),
    )
    .execute(&mut *connection)?;
    if deleted == 0 {
        return Err(ValidationError::from("article", "not favorited").into());
    }

    let view = load_view(article, Some(&user), &mut connection)?;
    Ok(Json(ArticleResponse { article: view }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::borrow::Cow;

    fn sample_article(updated: Option<DateTime<Utc>>) -> Article {
        Article {
            id: 1,
            author_id: 2,
            slug: "how-to-train-your-dragon".to_string(),
            title: "How to train your dragon".to_string(),
            description: "Ever wonder how?".to_string(),
            body: "You have to believe".to_string(),
            created_at: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            updated_at: updated,
        }
    }

    fn sample_author() -> Profile<'static> {
        Profile {
            username: Cow::Borrowed("jake"),
            bio: None,
            image: None,
            following: false,
        }
    }

    #[test]
    fn slugs_are_lowercase_and_hyphenated() {
        assert_eq!(
            slugify("How to Train Your Dragon?!"),
            "how-to-train-your-dragon"
        );
    }

    #[test]
    fn never_updated_articles_report_created_at_as_updated_at() {
        let view = ArticleView::from(sample_article(None), sample_author(), vec![], false, 0);
        assert_eq!(view.updated_at, view.created_at);

        let later = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let view = ArticleView::from(
            sample_article(Some(later)),
            sample_author(),
            vec![],
            false,
            0,
        );
        assert_eq!(view.updated_at, later);
    }

    #[test]
    fn views_serialize_in_the_wire_shape() {
        let view = ArticleView::from(
            sample_article(None),
            sample_author(),
            vec!["dragons".to_string()],
            true,
            3,
        );
        let json = serde_json::to_value(ArticleResponse { article: view }).unwrap();
        let article = &json["article"];
        assert_eq!(article["slug"], "how-to-train-your-dragon");
        assert_eq!(article["tagList"], serde_json::json!(["dragons"]));
        assert_eq!(article["favorited"], true);
        assert_eq!(article["favoritesCount"], 3);
        assert_eq!(article["createdAt"], "2023-05-01T12:00:00.000Z");
        assert_eq!(article["author"]["username"], "jake");
        assert_eq!(article["author"]["following"], false);
    }

    #[test]
    fn tag_lists_are_trimmed_and_deduplicated() {
        let tags = dedup_tags(vec![
            " rust ".to_string(),
            "rust".to_string(),
            "".to_string(),
            "web".to_string(),
        ]);
        assert_eq!(tags, vec!["rust", "web"]);
    }

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(page_limits(None, None), (20, 0));
        assert_eq!(page_limits(Some(1000), Some(-5)), (100, 0));
        assert_eq!(page_limits(Some(0), Some(40)), (1, 40));
    }
}
