use std::{env, fmt, net::Ipv4Addr, net::SocketAddr, str::FromStr, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/domains.db?mode=rwc";
pub const DEFAULT_DNS_API_BASE: &str = "https://api.cloudflare.com/client/v4/";
pub const DEFAULT_DNS_CNAME_TARGET: &str = "cname.vercel-dns.com";
pub const DEFAULT_DNS_APEX_TARGET: &str = "76.76.21.21";
pub const DEFAULT_PLATFORM_API_BASE: &str = "https://api.vercel.com/";

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
    pub dns: DnsConfig,
    pub platform: PlatformConfig,
    pub push: PushConfig,
}

/// DNS provider access and the record targets hostnames point at.
#[derive(Clone)]
pub struct DnsConfig {
    pub api_base: Url,
    pub api_token: String,
    pub zone_id: String,
    /// CNAME content for sub-domains.
    pub cname_target: String,
    /// A record content for apex hostnames.
    pub apex_target: Ipv4Addr,
}

impl fmt::Debug for DnsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsConfig")
            .field("api_base", &self.api_base.as_str())
            .field("api_token", &"<redacted>")
            .field("zone_id", &self.zone_id)
            .field("cname_target", &self.cname_target)
            .field("apex_target", &self.apex_target)
            .finish()
    }
}

/// Hosting platform access.
#[derive(Clone)]
pub struct PlatformConfig {
    pub api_base: Url,
    pub api_token: String,
    /// Project used for sites without their own override.
    pub project_id: String,
    pub team_id: Option<String>,
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("api_base", &self.api_base.as_str())
            .field("api_token", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("team_id", &self.team_id)
            .finish()
    }
}

/// Limits and pacing for the push orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConfig {
    pub provider_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub lock_timeout: Duration,
    pub verify_polls: u32,
    pub verify_interval: Duration,
    pub max_self_heals: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(15),
            max_attempts: 6,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(30_000),
            lock_timeout: Duration::from_millis(5_000),
            verify_polls: 5,
            verify_interval: Duration::from_millis(3_000),
            max_self_heals: 3,
        }
    }
}

impl PushConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            provider_timeout: Duration::from_secs(parse_var(
                "PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )?),
            max_attempts: parse_var("PUSH_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base: millis_var("PUSH_BACKOFF_BASE_MS", defaults.backoff_base)?,
            backoff_max: millis_var("PUSH_BACKOFF_MAX_MS", defaults.backoff_max)?,
            lock_timeout: millis_var("PUSH_LOCK_TIMEOUT_MS", defaults.lock_timeout)?,
            verify_polls: parse_var("PUSH_VERIFY_POLLS", defaults.verify_polls)?,
            verify_interval: millis_var("PUSH_VERIFY_INTERVAL_MS", defaults.verify_interval)?,
            max_self_heals: parse_var("PUSH_MAX_SELF_HEALS", defaults.max_self_heals)?,
        };

        if config.provider_timeout.is_zero() {
            return Err(ConfigError::invalid("PROVIDER_TIMEOUT_SECS", "must be positive"));
        }
        if config.max_attempts == 0 {
            return Err(ConfigError::invalid("PUSH_MAX_ATTEMPTS", "must be at least 1"));
        }
        if config.verify_polls == 0 {
            return Err(ConfigError::invalid("PUSH_VERIFY_POLLS", "must be at least 1"));
        }
        if config.backoff_base > config.backoff_max {
            return Err(ConfigError::invalid(
                "PUSH_BACKOFF_BASE_MS",
                "must not exceed PUSH_BACKOFF_MAX_MS",
            ));
        }
        Ok(config)
    }
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url = optional_var("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let dns = DnsConfig {
            api_base: base_url_var("DNS_API_BASE", DEFAULT_DNS_API_BASE)?,
            api_token: required_var("DNS_API_TOKEN")?,
            zone_id: required_var("DNS_ZONE_ID")?,
            cname_target: optional_var("DNS_CNAME_TARGET")
                .unwrap_or_else(|| DEFAULT_DNS_CNAME_TARGET.to_string()),
            apex_target: optional_var("DNS_APEX_TARGET")
                .unwrap_or_else(|| DEFAULT_DNS_APEX_TARGET.to_string())
                .parse()
                .map_err(|_| ConfigError::invalid("DNS_APEX_TARGET", "must be an IPv4 address"))?,
        };

        let platform = PlatformConfig {
            api_base: base_url_var("PLATFORM_API_BASE", DEFAULT_PLATFORM_API_BASE)?,
            api_token: required_var("PLATFORM_API_TOKEN")?,
            project_id: required_var("PLATFORM_PROJECT_ID")?,
            team_id: optional_var("PLATFORM_TEAM_ID"),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            dns,
            platform,
            push: PushConfig::from_env()?,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    InvalidValue {
        var: &'static str,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            var,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(var) => write!(f, "{var} must be set"),
            Self::InvalidUrl { var, source } => write!(f, "invalid {var} value: {source}"),
            Self::InvalidValue { var, reason } => write!(f, "invalid {var} value: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn optional_var(var: &'static str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required_var(var: &'static str) -> Result<String, ConfigError> {
    optional_var(var).ok_or(ConfigError::Missing(var))
}

fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match optional_var(var) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::invalid(var, format!("`{value}` is not a number"))),
        None => Ok(default),
    }
}

fn millis_var(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = parse_var(var, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

/// Parses a provider base URL, adding the trailing slash `Url::join` relies on.
fn base_url_var(var: &'static str, default: &str) -> Result<Url, ConfigError> {
    let mut value = optional_var(var).unwrap_or_else(|| default.to_string());
    if !value.ends_with('/') {
        value.push('/');
    }
    Url::parse(&value).map_err(|source| ConfigError::InvalidUrl { var, source })
}
