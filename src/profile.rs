use std::borrow::Cow;

use diesel::dsl::exists;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::{delete, insert_into, select};
use rocket::serde::json::Json;
use serde::Serialize;

use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;

#[derive(Debug, Serialize)]
pub struct ProfileResponse<'a> {
    profile: Profile<'a>,
}

#[derive(Debug, Serialize)]
pub struct Profile<'a> {
    pub username: Cow<'a, str>,
    pub bio: Option<Cow<'a, str>>,
    pub image: Option<Cow<'a, str>>,
    pub following: bool,
}

pub fn is_following(
    follower: i32,
    followee: i32,
    connection: &mut PgConnection,
) -> Result<bool, ApiError> {
    use crate::db::schema::follows::dsl::*;
    let query = select(exists(
        follows
            .filter(follower_id.eq(follower))
            .filter(followee_id.eq(followee)),
    ));
    query.get_result::<bool>(connection).map_err(|e| e.into())
}

#[get("/profiles/<name>", format = "json")]
pub fn profile(
    mut connection: DbConnection,
    current_user: Option<User>,
    name: &str,
) -> ApiResult<ProfileResponse<'static>> {
    let user = User::load_by_name(name, &mut connection)?;
    let following = match current_user {
        Some(current) => is_following(current.id, user.id, &mut connection)?,
        None => false,
    };

    Ok(Json(ProfileResponse {
        profile: user.profile(following),
    }))
}

#[post("/profiles/<name>/follow", format = "json")]
pub fn follow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: &str,
) -> ApiResult<ProfileResponse<'static>> {
    use crate::db::schema::follows::dsl::*;

    let current = current_user?;
    let target = User::load_by_name(name, &mut connection)?;
    if target.id == current.id {
        return Err(ValidationError::from("username", "cannot follow yourself").into());
    }
    // Double-follow is an invalid state, not a no-op. The unique pair
    // constraint turns a racing insert into the same 400.
    if is_following(current.id, target.id, &mut connection)? {
        return Err(ValidationError::from("username", "already following").into());
    }
    insert_into(follows)
        .values((follower_id.eq(current.id), followee_id.eq(target.id)))
        .execute(&mut *connection)?;

    Ok(Json(ProfileResponse {
        profile: target.profile(true),
    }))
}

#[delete("/profiles/<name>/follow", format = "json")]
pub fn unfollow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: &str,
) -> ApiResult<ProfileResponse<'static>> {
    use crate::db::schema::follows::dsl::*;

    let current = current_user?;
    let target = User::load_by_name(name, &mut connection)?;
    let deleted = delete(
        follows
            .filter(follower_id.eq(current.id))
            .filter(followee_id.eq(target.id)),
    )
    .execute(&mut *connection)?;
    if deleted == 0 {
        return Err(ValidationError::from("username", "not following").into());
    }

    Ok(Json(ProfileResponse {
        profile: target.profile(false),
    }))
}
