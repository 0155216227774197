use std::borrow::Cow;

use chrono::{Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::password_hash::rand_core::OsRng;
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::schema::users;
use crate::profile::Profile;
use crate::types::ApiError;

#[derive(Debug, PartialEq, Queryable, Identifiable, Serialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

/// Token claims: the user id and an expiry, HMAC-signed with the
/// configured secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub exp: i64,
}

pub fn decode_token(token: &str, config: &Config) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

impl User {
    pub fn make_password(password: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);
        Pbkdf2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| ApiError::Internal)
    }

    pub fn new_password(&mut self, password: &str) -> Result<(), ApiError> {
        self.password = User::make_password(password)?;
        Ok(())
    }

    pub fn verify_password(&self, password_to_verify: &str) -> Result<bool, ApiError> {
        let parsed = PasswordHash::new(&self.password).map_err(|_| ApiError::Internal)?;
        Ok(Pbkdf2
            .verify_password(password_to_verify.as_bytes(), &parsed)
            .is_ok())
    }

    pub fn token(&self, config: &Config) -> Result<String, ApiError> {
        let expires = Utc::now() + Duration::seconds(config.jwt_ttl_seconds);
        let claims = Claims {
            sub: self.id,
            exp: expires.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .map_err(|_| ApiError::Internal)
    }

    pub fn load_from_token(
        token: &str,
        config: &Config,
        connection: &mut PgConnection,
    ) -> Result<User, ApiError> {
        let claims = decode_token(token, config)?;
        users::table
            .find(claims.sub)
            .first::<User>(connection)
            .optional()?
            .ok_or(ApiError::Unauthorized)
    }

    pub fn load_by_name(name: &str, connection: &mut PgConnection) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(username.eq(name))
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn profile(&self, following: bool) -> Profile<'static> {
        Profile {
            username: Cow::Owned(self.username.clone()),
            bio: self.bio.clone().map(Cow::Owned),
            image: self.image.clone().map(Cow::Owned),
            following,
        }
    }

    pub fn view(&self, token: String) -> UserView {
        UserView {
            email: self.email.clone(),
            token,
            username: self.username.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
        }
    }
}

/// The `{"user": ...}` payload returned by signup, login, and user routes.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub email: String,
    pub token: String,
    pub username: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            jwt_secret: "unit-test-secret".to_string(),
            jwt_ttl_seconds: 3600,
        }
    }

    fn test_user() -> User {
        User {
            id: 7,
            username: "U1".to_string(),
            email: "u1@example.com".to_string(),
            password: String::new(),
            bio: None,
            image: None,
        }
    }

    #[test]
    fn password_round_trip() {
        let mut user = test_user();
        user.new_password("password123").unwrap();
        assert!(user.verify_password("password123").unwrap());
        assert!(!user.verify_password("password124").unwrap());
    }

    #[test]
    fn token_round_trip_carries_the_user_id() {
        let config = test_config();
        let token = test_user().token(&config).unwrap();
        let claims = decode_token(&token, &config).unwrap();
        assert_eq!(claims.sub, 7);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let mut config = test_config();
        config.jwt_ttl_seconds = -3600;
        let token = test_user().token(&config).unwrap();
        assert!(matches!(
            decode_token(&token, &config),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let config = test_config();
        let token = test_user().token(&config).unwrap();
        let mut other = test_config();
        other.jwt_secret = "some-other-secret".to_string();
        assert!(matches!(
            decode_token(&token, &other),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let config = test_config();
        assert!(matches!(
            decode_token("not-a-jwt", &config),
            Err(ApiError::Unauthorized)
        ));
    }
}
