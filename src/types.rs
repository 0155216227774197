use std::collections::HashMap;

use diesel::pg::PgConnection;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde::Serialize;
use thiserror::Error;

use crate::utils::try_respond;

pub trait Validate
where
    Self: Sized,
{
    type Error;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error>;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(DieselError),
    #[error("validation failed")]
    Validation(ValidationError),
    #[error("resource not found")]
    NotFound,
    /// Mutation of a resource owned by another user. Rendered as 400 for
    /// wire compatibility with the reference API, not 403.
    #[error("action not permitted")]
    Forbidden,
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("internal error")]
    Internal,
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        match err {
            DieselError::NotFound => ApiError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                ApiError::Validation(ValidationError::from("constraint", info.message()))
            }
            other => ApiError::Database(other),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Per-field validation failures, accumulated across checks and rendered as
/// `{"errors": {field: [messages]}}`.
#[derive(Debug, Serialize, Default)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::NotFound => Status::NotFound,
            ApiError::Unauthorized => Status::Unauthorized,
            ApiError::Validation(_) | ApiError::Forbidden => Status::BadRequest,
            ApiError::Database(_) | ApiError::Internal => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let body = match self {
            ApiError::Validation(error) => serde_json::json!({ "errors": error }),
            ApiError::Forbidden => serde_json::json!({
                "errors": { "author": ["only the author may modify this resource"] }
            }),
            ApiError::Unauthorized => serde_json::json!({
                "errors": { "status": "401 Unauthorized" }
            }),
            ApiError::NotFound => serde_json::json!({ "errors": ["entity not found"] }),
            ApiError::Database(error) => {
                log::error!("unexpected database error: {}", error);
                serde_json::json!({ "errors": ["internal error"] })
            }
            ApiError::Internal => serde_json::json!({ "errors": ["internal error"] }),
        };
        try_respond(req, &body, status)
    }
}

impl<T> Validate for Json<T>
where
    T: Validate,
{
    type Error = <T as Validate>::Error;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error> {
        let inner = self.into_inner();
        let validated = inner.validate(connection)?;
        Ok(Json(validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_accumulate_per_field() {
        let mut errors = ValidationError::default();
        assert!(errors.empty());
        errors.add_error("email", "invalid email");
        errors.add_error("email", "email already exists");
        errors.add_error("username", "username too short");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.0["email"].len(), 2);
    }

    #[test]
    fn merge_combines_both_maps() {
        let mut left = ValidationError::from("email", "taken");
        let right = {
            let mut e = ValidationError::from("email", "invalid");
            e.add_error("password", "too short");
            e
        };
        left.merge(right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.0["email"], vec!["taken", "invalid"]);
    }

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(ApiError::Unauthorized.status(), Status::Unauthorized);
        assert_eq!(ApiError::NotFound.status(), Status::NotFound);
        assert_eq!(ApiError::Forbidden.status(), Status::BadRequest);
        assert_eq!(
            ApiError::from(ValidationError::from("password", "invalid password")).status(),
            Status::BadRequest
        );
    }

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        let err: ApiError = DieselError::NotFound.into();
        assert!(matches!(err, ApiError::NotFound));
    }
}
