use diesel::dsl::exists;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::select;
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{ApiError, ValidationError};

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$";
        Regex::new(pattern).unwrap()
    };
}

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from(
            "email",
            format!("invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    if username.len() < 3 {
        Err(ValidationError::from(
            "username",
            format!("username too short: {}", username),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_email(
    email_to_validate: &str,
    connection: &mut PgConnection,
) -> Result<(), ApiError> {
    use crate::db::schema::users::dsl::*;
    let mut errors = ValidationError::default();
    if let Err(e) = validate_email_re(email_to_validate) {
        errors.merge(e);
    }

    let email_exists = select(exists(users.filter(email.eq(email_to_validate))))
        .get_result::<bool>(connection)?;
    if email_exists {
        errors.add_error("email", "email already exists");
    }
    if errors.len() > 0 {
        Err(errors.into())
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < 5 {
        let e = ValidationError::from("password", "password too short");
        Err(e)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(validate_email_re("test@example.com").is_ok());
        assert!(validate_email_re("first.last+tag@sub.example.org").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(validate_email_re("not-an-email").is_err());
        assert!(validate_email_re("missing@tld@twice.com").is_err());
        assert!(validate_email_re("@example.com").is_err());
        assert!(validate_email_re("user@").is_err());
    }

    #[test]
    fn username_needs_three_characters() {
        assert!(validate_username_re("ab").is_err());
        assert!(validate_username_re("abc").is_ok());
    }

    #[test]
    fn password_needs_five_characters() {
        assert!(validate_password("1234").is_err());
        assert!(validate_password("12345").is_ok());
    }
}
