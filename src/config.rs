use std::env;

use log::warn;

/// Runtime settings, read once at startup and managed as Rocket state.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_ttl_seconds: i64,
}

const DEFAULT_TTL_SECONDS: i64 = 24 * 60 * 60;

impl Config {
    pub fn load() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, tokens will not survive a restart");
            "conduit-dev-secret".to_string()
        });
        let jwt_ttl_seconds = match env::var("JWT_TTL_SECONDS") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("invalid JWT_TTL_SECONDS ({}), using default", e);
                DEFAULT_TTL_SECONDS
            }),
            Err(_) => DEFAULT_TTL_SECONDS,
        };

        Ok(Config {
            database_url,
            jwt_secret,
            jwt_ttl_seconds,
        })
    }
}
