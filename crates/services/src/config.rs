//! Runtime configuration, read from `LEARN_*` environment variables.
//!
//! A `.env` file in the working directory is honoured outside of tests.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use storage::sqlite::PoolSettings;
use study_core::BackoffPolicy;
use study_core::timer::Heartbeat;
use tracing::Level;
use url::Url;

pub const DEFAULT_DB_URL: &str = "sqlite://study.sqlite3";
pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing the environment variable {0}")]
    MissingVar(String),
    #[error("invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the OpenAI-compatible tutor endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AiConfig {
    pub base_url: Url,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub pool: PoolSettings,
    pub retry: BackoffPolicy,
    pub heartbeat: Heartbeat,
    /// `None` when no API key is set; the tutor then serves fallbacks only.
    pub ai: Option<AiConfig>,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DB_URL.to_string(),
            pool: PoolSettings::default(),
            retry: BackoffPolicy::default(),
            heartbeat: Heartbeat::default(),
            ai: None,
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is present but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is present but unparsable.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = match get("LEARN_DB_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::MissingVar("LEARN_DB_URL".into()));
            }
            Some(url) => url.trim().to_string(),
            None => DEFAULT_DB_URL.to_string(),
        };

        let pool = PoolSettings {
            max_connections: parsed(&get, "LEARN_DB_MAX_CONNECTIONS", 5_u32)?,
            acquire_timeout: Duration::from_secs(parsed(
                &get,
                "LEARN_DB_ACQUIRE_TIMEOUT_SECS",
                5_u64,
            )?),
            busy_timeout_ms: parsed(&get, "LEARN_DB_BUSY_TIMEOUT_MS", 5000_u64)?,
        };

        let retry = BackoffPolicy::new(
            parsed(&get, "LEARN_RETRY_MAX_ATTEMPTS", BackoffPolicy::DEFAULT_MAX_ATTEMPTS)?,
            Duration::from_millis(parsed(&get, "LEARN_RETRY_BASE_DELAY_MS", 500_u64)?),
        );

        let heartbeat_secs: i64 = parsed(&get, "LEARN_HEARTBEAT_SECS", 10_i64)?;
        let heartbeat = chrono::Duration::try_seconds(heartbeat_secs)
            .ok_or_else(|| "out of range".to_string())
            .and_then(|interval| Heartbeat::new(interval).map_err(|e| e.to_string()))
            .map_err(|e| ConfigError::InvalidValue("LEARN_HEARTBEAT_SECS".into(), e))?;

        let ai = match get("LEARN_AI_API_KEY").filter(|k| !k.trim().is_empty()) {
            Some(api_key) => {
                let raw = get("LEARN_AI_BASE_URL").unwrap_or_else(|| DEFAULT_AI_BASE_URL.into());
                let base_url = Url::parse(raw.trim()).map_err(|e| {
                    ConfigError::InvalidValue("LEARN_AI_BASE_URL".into(), e.to_string())
                })?;
                Some(AiConfig {
                    base_url,
                    api_key: api_key.trim().to_string(),
                    model: get("LEARN_AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.into()),
                    timeout: Duration::from_secs(parsed(&get, "LEARN_AI_TIMEOUT_SECS", 30_u64)?),
                    max_retries: parsed(&get, "LEARN_AI_MAX_RETRIES", 3_u32)?,
                })
            }
            None => None,
        };

        let log_raw = get("RUST_LOG").unwrap_or_else(|| "INFO".into());
        let log_level = log_raw.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".into(),
                format!("'{log_raw}' is not a valid log level"),
            )
        })?;

        Ok(Self {
            database_url,
            pool,
            retry,
            heartbeat,
            ai,
            log_level,
        })
    }
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
