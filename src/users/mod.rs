use diesel::dsl::exists;
use diesel::insert_into;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::{select, update as diesel_update};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};
use rocket::serde::json::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};

pub mod models;
mod utils;

use self::utils::*;

pub type CurrentUser = Result<models::User, ApiError>;

#[derive(Debug, Deserialize)]
struct RegistrationDetails {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    user: RegistrationDetails,
}

impl Validate for Registration {
    type Error = ApiError;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error> {
        use crate::db::schema::users::dsl::*;
        let mut errors = ValidationError::default();

        match validate_email(&self.user.email, connection) {
            Ok(_) => {}
            Err(ApiError::Validation(e)) => errors.merge(e),
            Err(other) => return Err(other),
        }

        if let Err(e) = validate_username_re(&self.user.username) {
            errors.merge(e);
        }

        if let Err(e) = validate_password(&self.user.password) {
            errors.merge(e);
        }

        let username_exists = select(exists(users.filter(username.eq(&self.user.username))))
            .get_result::<bool>(connection)?;
        if username_exists {
            errors.add_error("username", "username already exists");
        }

        if errors.len() > 0 {
            Err(errors.into())
        } else {
            Ok(self)
        }
    }
}

#[post("/", format = "json", data = "<registration>")]
pub fn register(
    mut connection: DbConnection,
    config: &rocket::State<Config>,
    registration: Json<Registration>,
) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;

    let registration = registration.validate(&mut connection)?;
    let new_user = models::NewUser {
        username: registration.user.username.clone(),
        email: registration.user.email.clone(),
        password: models::User::make_password(&registration.user.password)?,
    };

    let user = insert_into(users)
        .values(&new_user)
        .get_result::<models::User>(&mut *connection)?;
    let token = user.token(config)?;
    Ok(Json(serde_json::json!({ "user": user.view(token) })))
}

#[derive(Debug, Deserialize)]
struct LoginDetails {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    user: LoginDetails,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for models::User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ApiError> {
        let token = match request.headers().get_one("Authorization") {
            Some(header) => match header.strip_prefix("Token ") {
                Some(token) => token.trim().to_string(),
                None => return Outcome::Error((Status::Unauthorized, ApiError::Unauthorized)),
            },
            None => return Outcome::Error((Status::Unauthorized, ApiError::Unauthorized)),
        };

        let config = match request.rocket().state::<Config>() {
            Some(config) => config,
            None => return Outcome::Error((Status::InternalServerError, ApiError::Internal)),
        };

        let mut connection = match request.guard::<DbConnection>().await {
            Outcome::Success(connection) => connection,
            _ => return Outcome::Error((Status::ServiceUnavailable, ApiError::Internal)),
        };

        match models::User::load_from_token(&token, config, &mut connection) {
            Ok(user) => Outcome::Success(user),
            Err(e @ ApiError::Unauthorized) => Outcome::Error((Status::Unauthorized, e)),
            Err(e) => Outcome::Error((Status::InternalServerError, e)),
        }
    }
}

#[post("/login", format = "json", data = "<login>")]
pub fn login(
    mut connection: DbConnection,
    config: &rocket::State<Config>,
    login: Json<Login>,
) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;

    // An unknown email is a credentials failure, not a missing resource.
    let user = users
        .filter(email.eq(&login.user.email))
        .first::<models::User>(&mut *connection)
        .optional()?;
    let user = match user {
        Some(user) => user,
        None => {
            return Err(ValidationError::from("email or password", "is invalid").into());
        }
    };

    if user.verify_password(&login.user.password)? {
        let token = user.token(config)?;
        Ok(Json(serde_json::json!({ "user": user.view(token) })))
    } else {
        Err(ValidationError::from("email or password", "is invalid").into())
    }
}

#[get("/user", format = "json")]
pub fn current(user: CurrentUser, config: &rocket::State<Config>) -> ApiResult<Value> {
    let user = user?;
    let token = user.token(config)?;
    Ok(Json(serde_json::json!({ "user": user.view(token) })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

#[put("/user", format = "json", data = "<update>")]
pub fn update(
    current_user: CurrentUser,
    mut connection: DbConnection,
    config: &rocket::State<Config>,
    update: Json<Update>,
) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;

    let mut user = current_user?;
    let mut error = ValidationError::default();
    let update = update.into_inner();

    if update.user.bio.is_some() {
        user.bio = update.user.bio;
    }
    if update.user.image.is_some() {
        user.image = update.user.image;
    }

    if let Some(new_email) = update.user.email {
        match validate_email_re(&new_email) {
            Err(e) => error.merge(e),
            Ok(_) => user.email = new_email,
        }

        let expr = users.filter(email.eq(&user.email)).filter(id.ne(user.id));
        let email_exists = select(exists(expr)).get_result::<bool>(&mut *connection)?;
        if email_exists {
            error.add_error("email", format!("email already chosen: {}", &user.email));
        }
    }

    if let Some(new_username) = update.user.username {
        match validate_username_re(&new_username) {
            Err(e) => error.merge(e),
            Ok(_) => user.username = new_username,
        }
        let expr = users
            .filter(username.eq(&user.username))
            .filter(id.ne(user.id));
        let username_exists = select(exists(expr)).get_result::<bool>(&mut *connection)?;
        if username_exists {
            error.add_error(
                "username",
                format!("username already chosen: {}", user.username),
            );
        }
    }

    if let Some(new_password) = update.user.password {
        match validate_password(&new_password) {
            Err(e) => error.merge(e),
            Ok(_) => user.new_password(&new_password)?,
        }
    }

    if !error.empty() {
        Err(error.into())
    } else {
        diesel_update(&user).set(&user).execute(&mut *connection)?;
        let token = user.token(config)?;
        Ok(Json(serde_json::json!({ "user": user.view(token) })))
    }
}
