use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Service settings, read from the process environment with `.env` as a fallback.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let assessment_window_secs = env::var("APP_ASSESSMENT_WINDOW_SECS")
            .unwrap_or_else(|_| DEFAULT_ASSESSMENT_WINDOW_SECS.to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidAssessmentWindow)?;

        let persist_attempts = env::var("APP_PERSIST_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_PERSIST_ATTEMPTS.to_string())
            .parse::<u32>()
            .ok()
            .filter(|attempts| *attempts >= 1)
            .ok_or(ConfigError::InvalidPersistAttempts)?;

        Ok(Self {
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lifecycle: LifecycleConfig {
                assessment_window: Duration::from_secs(assessment_window_secs),
                persist_attempts,
            },
        })
    }
}

/// Address the HTTP API listens on.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Verbosity handed to the telemetry filter.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

pub const DEFAULT_ASSESSMENT_WINDOW_SECS: u64 = 3600;
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;

/// Knobs for the application lifecycle gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long an applicant has to finish a code challenge once it is issued.
    pub assessment_window: Duration,
    /// Save attempts made against an unavailable repository before giving up.
    pub persist_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            assessment_window: Duration::from_secs(DEFAULT_ASSESSMENT_WINDOW_SECS),
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAssessmentWindow,
    InvalidPersistAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAssessmentWindow => {
                write!(f, "APP_ASSESSMENT_WINDOW_SECS must be a positive number of seconds")
            }
            ConfigError::InvalidPersistAttempts => {
                write!(f, "APP_PERSIST_ATTEMPTS must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidAssessmentWindow
            | ConfigError::InvalidPersistAttempts => None,
        }
    }
}
