use std::env;
use thiserror::Error;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;
const DEFAULT_DATABASE_URL: &str = "sqlite://encore.db?mode=rwc";

/// Server settings, read from the environment at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Shared key for realtime capability tokens. Token issuance is
    /// disabled while unset.
    pub realtime_signing_key: Option<String>,
    pub session_retention_days: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ENCORE_PORT must be a number")]
    InvalidPort,
    #[error("ENCORE_SESSION_RETENTION_DAYS must be a number of at least 1")]
    InvalidRetention,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("ENCORE_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => DEFAULT_PORT,
        };

        let session_retention_days = match env::var("ENCORE_SESSION_RETENTION_DAYS") {
            Ok(raw) => {
                let days: i64 = raw.parse().map_err(|_| ConfigError::InvalidRetention)?;

                if days < 1 {
                    return Err(ConfigError::InvalidRetention);
                }

                days
            }
            Err(_) => 7,
        };

        let database_url =
            env::var("ENCORE_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let realtime_signing_key = env::var("ENCORE_REALTIME_KEY").ok();

        Ok(Self {
            port,
            database_url,
            realtime_signing_key,
            session_retention_days,
        })
    }
}
