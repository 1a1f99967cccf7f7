use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

use crate::db::{PoolSettings, DEFAULT_MAX_LIFETIME, DEFAULT_MAX_POOL_SIZE, DEFAULT_MIN_IDLE};
use crate::dialect::Engine;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub engine: Engine,
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub database_min_idle: u32,
    pub database_max_lifetime: Duration,
    pub request_timeout: Duration,
    pub cors_allowed_origin: Option<String>,
}

/// Connection components used when `DATABASE_URL` is not given.
#[derive(Clone, Debug)]
struct DatabaseParts {
    host: String,
    port: String,
    name: String,
    user: String,
    password: String,
    ssl_mode: String,
    path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let server_host = env_or("SERVER_HOST", "0.0.0.0");
        let server_port = env_or("PORT", "8080")
            .parse()
            .context("PORT must be a valid u16")?;
        let engine: Engine = env_or("DB_ENGINE", "postgresql").parse()?;

        let database_url = match non_empty_var("DATABASE_URL") {
            Some(url) => url,
            None => {
                let parts = DatabaseParts {
                    host: env_or("DB_HOST", "localhost"),
                    port: env_or("DB_PORT", "5432"),
                    name: env_or("DB_NAME", "paperless"),
                    user: env_or("DB_USER", "paperless"),
                    password: env_or("DB_PASS", "paperless"),
                    ssl_mode: env_or("DB_SSL_MODE", "prefer"),
                    path: env_or("DB_PATH", "paperless.sqlite3"),
                };
                build_database_url(engine, &parts)
            }
        };

        let database_max_pool_size = parse_or("DATABASE_MAX_POOL_SIZE", DEFAULT_MAX_POOL_SIZE)?;
        let database_min_idle = parse_or("DATABASE_MIN_IDLE", DEFAULT_MIN_IDLE)?;
        let database_max_lifetime = Duration::from_secs(parse_or(
            "DATABASE_MAX_LIFETIME_SECS",
            DEFAULT_MAX_LIFETIME.as_secs(),
        )?);
        let request_timeout = Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 15)?);
        let cors_allowed_origin = non_empty_var("CORS_ALLOWED_ORIGIN");

        Ok(Self {
            server_host,
            server_port,
            engine,
            database_url,
            database_max_pool_size,
            database_min_idle,
            database_max_lifetime,
            request_timeout,
            cors_allowed_origin,
        })
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_size: self.database_max_pool_size,
            min_idle: self.database_min_idle,
            max_lifetime: self.database_max_lifetime,
            statement_timeout: self.request_timeout,
        }
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    non_empty_var(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}

fn build_database_url(engine: Engine, parts: &DatabaseParts) -> String {
    let user = utf8_percent_encode(&parts.user, NON_ALPHANUMERIC);
    let password = utf8_percent_encode(&parts.password, NON_ALPHANUMERIC);
    match engine {
        Engine::Postgres => format!(
            "postgres://{user}:{password}@{}:{}/{}?sslmode={}",
            parts.host, parts.port, parts.name, parts.ssl_mode
        ),
        Engine::Mysql => format!(
            "mysql://{user}:{password}@{}:{}/{}",
            parts.host, parts.port, parts.name
        ),
        Engine::Sqlite => parts.path.clone(),
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
