use std::{env, fmt, net::SocketAddr, str::FromStr};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://order_board.db?mode=rwc";
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";
/// Center used when neither a center nor a resolvable location is supplied.
pub const DEFAULT_CENTER_ID: i64 = 341;
pub const DEFAULT_PENDING_GROUP_SIZE: usize = 10;

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

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// Separate product catalog database; `None` means the primary database holds it.
    pub catalog_database_url: Option<String>,
    /// IANA zone name used to decide which calendar day is "today".
    pub timezone: String,
    pub default_center_id: i64,
    pub pending_group_size: usize,
    pub run_migrations: bool,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = bind_address()?;

        let database_url = non_empty_var("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let catalog_database_url = non_empty_var("CATALOG_DATABASE_URL");
        let timezone = non_empty_var("APP_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

        let default_center_id = parse_var("DEFAULT_CENTER_ID", DEFAULT_CENTER_ID)?;
        if default_center_id <= 0 {
            return Err(ConfigError::InvalidNumber {
                name: "DEFAULT_CENTER_ID",
                value: default_center_id.to_string(),
            });
        }

        let pending_group_size = parse_var("PENDING_GROUP_SIZE", DEFAULT_PENDING_GROUP_SIZE)?;
        if pending_group_size == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "PENDING_GROUP_SIZE",
                value: "0".to_string(),
            });
        }

        let run_migrations = match non_empty_var("RUN_MIGRATIONS") {
            Some(value) => parse_flag("RUN_MIGRATIONS", &value)?,
            None => !matches!(environment, Environment::Production),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            catalog_database_url,
            timezone,
            default_center_id,
            pending_group_size,
            run_migrations,
        })
    }
}

fn bind_address() -> Result<SocketAddr, ConfigError> {
    let value = non_empty_var("APP_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    value
        .parse()
        .map_err(|source| ConfigError::BindAddress { value, source })
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(default),
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress {
        value: String,
        source: std::net::AddrParseError,
    },
    InvalidNumber { name: &'static str, value: String },
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress { value, source } => {
                write!(f, "invalid APP_BIND_ADDR value '{value}': {source}")
            }
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
            Self::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean flag (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BindAddress { source, .. } => Some(source),
            _ => None,
        }
    }
}
