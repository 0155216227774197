use std::collections::HashSet;

use chrono::{DateTime, Utc};
use diesel::delete as diesel_delete;
use diesel::insert_into;
use diesel::prelude::*;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::db::schema::{comments, follows, users};
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::types::{ApiError, ApiResult, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;

#[derive(Debug, PartialEq, Identifiable, Queryable, Associations)]
#[diesel(table_name = comments, belongs_to(Article))]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub author_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView<'r> {
    id: i32,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
    body: String,
    author: Profile<'r>,
}

impl<'r> From<(Comment, Profile<'r>)> for CommentView<'r> {
    fn from((comment, profile): (Comment, Profile<'r>)) -> Self {
        CommentView {
            id: comment.id,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
            author: profile,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    article_id: i32,
    author_id: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentBody {
    body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentContainer<T> {
    comment: T,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentsContainer<T> {
    comments: T,
}

#[post("/<slug>/comments", format = "json", data = "<details>")]
pub fn add(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: &str,
    details: Json<CommentContainer<CommentBody>>,
) -> ApiResult<CommentContainer<CommentView<'static>>> {
    let user = current_user?;
    let article = Article::load_by_slug(slug, &mut connection)?;
    let details = details.into_inner();
    if details.comment.body.trim().is_empty() {
        return Err(ValidationError::from("body", "empty body").into());
    }

    let now = Utc::now();
    let new_comment = NewComment {
        article_id: article.id,
        author_id: user.id,
        created_at: now,
        updated_at: now,
        body: details.comment.body,
    };

    let comment = insert_into(comments::table)
        .values(&new_comment)
        .get_result::<Comment>(&mut *connection)?;

    let profile = user.profile(false);
    let container = CommentContainer {
        comment: (comment, profile).into(),
    };
    Ok(Json(container))
}

#[get("/<slug>/comments", format = "json")]
pub fn get(
    mut connection: DbConnection,
    current_user: Option<User>,
    slug: &str,
) -> ApiResult<CommentsContainer<Vec<CommentView<'static>>>> {
    let article = Article::load_by_slug(slug, &mut connection)?;
    let data = Comment::belonging_to(&article)
        .inner_join(users::table)
        .order(comments::created_at.asc())
        .load::<(Comment, User)>(&mut *connection)?;

    let followed: HashSet<i32> = match &current_user {
        Some(user) => {
            let author_ids: Vec<i32> = data.iter().map(|(_, author)| author.id).collect();
            follows::table
                .filter(follows::follower_id.eq(user.id))
                .filter(follows::followee_id.eq_any(author_ids))
                .select(follows::followee_id)
                .load::<i32>(&mut *connection)?
                .into_iter()
                .collect()
        }
        None => HashSet::new(),
    };

    let comments = data
        .into_iter()
        .map(|(comment, author)| {
            let profile = author.profile(followed.contains(&author.id));
            (comment, profile).into()
        })
        .collect();
    Ok(Json(CommentsContainer { comments }))
}

#[delete("/<slug>/comments/<id>", format = "json")]
pub fn delete(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: &str,
    id: i32,
) -> ApiResult<serde_json::Value> {
    let user = current_user?;
    let article = Article::load_by_slug(slug, &mut connection)?;
    let comment = comments::table
        .find(id)
        .first::<Comment>(&mut *connection)
        .optional()?
        .filter(|comment| comment.article_id == article.id)
        .ok_or(ApiError::NotFound)?;
    if comment.author_id != user.id {
        return Err(ApiError::Forbidden);
    }
    diesel_delete(&comment).execute(&mut *connection)?;
    Ok(Json(serde_json::json!({})))
}
