use crate::helper::rate_limiter::RateLimitConfig;
use crate::helper::session_manager::SessionPolicy;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    // Populated from the .env file
    pub database_path: String,
    pub allowed_origins: String,
    pub log_level: String,
    pub session_secret_key: String,
    pub use_secure_cookies: bool,
    pub login_max_attempts: u32,
    pub login_window_minutes: i64,
    pub login_lockout_minutes: i64,
    pub session_ttl_hours: i64,
    pub remember_ttl_days: i64,
}

fn required(name: &str) -> Result<String, config::ConfigError> {
    env::var(name).map_err(|_| {
        config::ConfigError::Message(format!(
            "FATAL: Environment variable '{}' is not set in your .env file.",
            name
        ))
    })
}

/// Optional positive number, falling back to `default` when unset.
fn positive<T>(name: &str, default: T) -> Result<T, config::ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(config::ConfigError::Message(format!(
                "FATAL: '{}' must be a positive whole number, got '{}'.",
                name, raw
            ))),
        },
    }
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path).map_err(|e| {
            config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}",
                env_path.display(),
                e
            ))
        })?;

        let database_path = required("DATABASE_PATH")?;
        if Path::new(&database_path).is_relative() {
            return Err(config::ConfigError::Message(format!(
                "FATAL: The 'DATABASE_PATH' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
                database_path
            )));
        }

        // 128 hex characters, i.e. the 64-byte cookie signing key.
        let session_secret_key = required("SESSION_SECRET_KEY")?;
        if session_secret_key.len() != 128 || !session_secret_key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(config::ConfigError::Message(
                "FATAL: 'SESSION_SECRET_KEY' must be 128 hexadecimal characters long (64 bytes).".to_string(),
            ));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let use_secure_cookies = env::var("USE_SECURE_COOKIES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let limits = RateLimitConfig::default();
        let policy = SessionPolicy::default();
        let login_max_attempts = positive("LOGIN_MAX_ATTEMPTS", limits.max_attempts)?;
        let login_window_minutes = positive("LOGIN_WINDOW_MINUTES", limits.window.num_minutes())?;
        let login_lockout_minutes = positive("LOGIN_LOCKOUT_MINUTES", limits.lockout.num_minutes())?;
        let session_ttl_hours = positive("SESSION_TTL_HOURS", policy.session_ttl.num_hours())?;
        let remember_ttl_days = positive("REMEMBER_TTL_DAYS", policy.remember_ttl.num_days())?;

        let builder = config::Config::builder()
            // Base settings (web host/port).
            .add_source(config::File::new("config/default.toml", config::FileFormat::Toml))
            .set_override("database_path", database_path)?
            .set_override("session_secret_key", session_secret_key)?
            .set_override("allowed_origins", allowed_origins)?
            .set_override("log_level", log_level)?
            .set_override("use_secure_cookies", use_secure_cookies)?
            .set_override("login_max_attempts", i64::from(login_max_attempts))?
            .set_override("login_window_minutes", login_window_minutes)?
            .set_override("login_lockout_minutes", login_lockout_minutes)?
            .set_override("session_ttl_hours", session_ttl_hours)?
            .set_override("remember_ttl_days", remember_ttl_days)?
            .build()?;

        builder.try_deserialize()
    }

    /// Users and the activity log.
    pub fn users_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("users").join("users.db")
    }

    pub fn articles_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("articles").join("articles.db")
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_attempts: self.login_max_attempts,
            window: chrono::Duration::minutes(self.login_window_minutes),
            lockout: chrono::Duration::minutes(self.login_lockout_minutes),
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            session_ttl: chrono::Duration::hours(self.session_ttl_hours),
            remember_ttl: chrono::Duration::days(self.remember_ttl_days),
        }
    }
}
