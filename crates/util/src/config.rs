use std::{env, fmt, net::SocketAddr, str::FromStr, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://job-location.db?mode=rwc";
pub const DEFAULT_BACKFILL_ACTOR: &str = "system:location-backfill";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Bearer token for the records API. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

/// Connection settings for the job/business persistence API.
#[derive(Debug, Clone)]
pub struct RecordsConfig {
    api_url: Option<String>,
    pub api_token: Option<ApiToken>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl RecordsConfig {
    /// Parses `RECORDS_API_URL`, appending a trailing `/` so relative joins
    /// stay below the configured path.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .api_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("RECORDS_API_URL"))?;
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        Url::parse(&normalized).map_err(|source| ConfigError::InvalidUrl {
            var: "RECORDS_API_URL",
            source,
        })
    }
}

/// Settings for backfill runs.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub page_size: u32,
    pub actor: String,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub records: RecordsConfig,
    pub backfill: BackfillConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let records = RecordsConfig {
            api_url: non_empty_var("RECORDS_API_URL"),
            api_token: non_empty_var("RECORDS_API_TOKEN").map(ApiToken),
            timeout: Duration::from_secs(parse_var("RECORDS_TIMEOUT_SECS", 30u64)?),
            max_retries: parse_var("RECORDS_MAX_RETRIES", 3u32)?,
            retry_base_delay: Duration::from_millis(parse_var("RECORDS_RETRY_BASE_MS", 200u64)?),
        };

        let page_size = parse_var("BACKFILL_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::InvalidValue {
                var: "BACKFILL_PAGE_SIZE",
                value: page_size.to_string(),
            });
        }
        let backfill = BackfillConfig {
            page_size,
            actor: non_empty_var("BACKFILL_ACTOR")
                .unwrap_or_else(|| DEFAULT_BACKFILL_ACTOR.to_string()),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url: non_empty_var("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            records,
            backfill,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            var: name,
            value,
        }),
        None => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidValue { var: &'static str, value: String },
    InvalidUrl { var: &'static str, source: url::ParseError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(var) => write!(f, "{var} must be set"),
            Self::InvalidValue { var, value } => write!(f, "invalid {var} value: {value}"),
            Self::InvalidUrl { var, source } => write!(f, "invalid {var} value: {source}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BindAddress(err) => Some(err),
            Self::InvalidUrl { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BIND_ADDR, ENV_GUARD};

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "RECORDS_API_URL",
        "RECORDS_API_TOKEN",
        "RECORDS_TIMEOUT_SECS",
        "RECORDS_MAX_RETRIES",
        "RECORDS_RETRY_BASE_MS",
        "BACKFILL_PAGE_SIZE",
        "BACKFILL_ACTOR",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.backfill.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.backfill.actor, DEFAULT_BACKFILL_ACTOR);
        assert_eq!(config.records.timeout, Duration::from_secs(30));
        assert_eq!(config.records.max_retries, 3);
        assert!(config.records.api_token.is_none());
        assert!(matches!(
            config.records.base_url(),
            Err(ConfigError::MissingVar("RECORDS_API_URL"))
        ));
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_env();
    }

    #[test]
    fn parses_records_settings() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("RECORDS_API_URL", "https://records.internal/api/v2");
        env::set_var("RECORDS_API_TOKEN", "t0ken");
        env::set_var("RECORDS_MAX_RETRIES", "0");
        env::set_var("BACKFILL_PAGE_SIZE", "250");
        env::set_var("BACKFILL_ACTOR", "ops:migration");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(
            config.records.base_url().expect("url").as_str(),
            "https://records.internal/api/v2/"
        );
        assert_eq!(
            config.records.api_token.as_ref().map(ApiToken::expose),
            Some("t0ken")
        );
        assert!(!format!("{:?}", config.records).contains("t0ken"));
        assert_eq!(config.records.max_retries, 0);
        assert_eq!(config.backfill.page_size, 250);
        assert_eq!(config.backfill.actor, "ops:migration");

        clear_env();
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("BACKFILL_PAGE_SIZE", "0");

        let err = AppConfig::from_env().expect_err("page size should be rejected");
        assert!(matches!(err, ConfigError::InvalidValue { var: "BACKFILL_PAGE_SIZE", .. }));

        env::set_var("BACKFILL_PAGE_SIZE", "many");
        let err = AppConfig::from_env().expect_err("page size should be rejected");
        assert!(matches!(err, ConfigError::InvalidValue { var: "BACKFILL_PAGE_SIZE", value } if value == "many"));

        clear_env();
    }

    #[test]
    fn rejects_invalid_records_url() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("RECORDS_API_URL", "not a url");

        let config = AppConfig::from_env().expect("url is parsed lazily");
        assert!(matches!(
            config.records.base_url(),
            Err(ConfigError::InvalidUrl { var: "RECORDS_API_URL", .. })
        ));

        clear_env();
    }
}
