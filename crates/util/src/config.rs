use std::{env, fmt, net::SocketAddr};

use super::{database_url, server_bind_address};

/// Signing secret accepted outside production so local runs work without setup.
const DEVELOPMENT_JWT_SECRET: &str = "stallplass-development-secret";
const DEFAULT_MAX_RANGE_MONTHS: u32 = 60;
const MAX_RANGE_MONTHS_CEILING: u32 = 600;

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

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// HS256 secret shared with the identity provider that issues bearer tokens.
    pub auth_jwt_secret: Vec<u8>,
    /// Upper bound on the number of months a single budget range read may span.
    pub budget_max_range_months: u32,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let auth_jwt_secret = match env::var("AUTH_JWT_SECRET") {
            Ok(value) if !value.trim().is_empty() => value.into_bytes(),
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingVar("AUTH_JWT_SECRET"))
            }
            _ => DEVELOPMENT_JWT_SECRET.as_bytes().to_vec(),
        };

        let budget_max_range_months = match env::var("BUDGET_MAX_RANGE_MONTHS") {
            Ok(raw) => parse_range_months(&raw)?,
            Err(_) => DEFAULT_MAX_RANGE_MONTHS,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            auth_jwt_secret,
            budget_max_range_months,
        })
    }
}

fn parse_range_months(raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(value) if (1..=MAX_RANGE_MONTHS_CEILING).contains(&value) => Ok(value),
        _ => Err(ConfigError::InvalidRangeMonths(raw.to_string())),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidRangeMonths(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set in production"),
            Self::InvalidRangeMonths(value) => write!(
                f,
                "BUDGET_MAX_RANGE_MONTHS must be an integer between 1 and {MAX_RANGE_MONTHS_CEILING} (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
