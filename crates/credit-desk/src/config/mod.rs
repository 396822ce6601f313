use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::credit::credentials::{DEFAULT_HASH_COST, MAX_HASH_COST, MIN_HASH_COST};
use crate::workflows::credit::tokens::{DEFAULT_TOKEN_TTL, DEVELOPMENT_TOKEN_SECRET};
use crate::workflows::credit::{AuditPolicy, BcryptHasher, DeskSettings, TokenIssuer};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub desk: DeskConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            desk: DeskConfig::from_env(environment)?,
        })
    }
}

/// Settings controlling the HTTP server binding.
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where credit desk records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite { path: PathBuf },
}

pub const DEFAULT_DATABASE_PATH: &str = "credit-desk.db";

/// Key material for bearer tokens. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(String);

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(..)")
    }
}

impl From<&str> for SigningSecret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Workflow settings: storage, audit policy, bureau timeout, and fixture seeding.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub store: StoreBackend,
    pub audit_policy: AuditPolicy,
    pub lookup_timeout: Duration,
    /// Seed demo accounts into an empty store on startup.
    pub seed_fixtures: bool,
    /// Secret assigned to seeded accounts. Seeding is skipped without one.
    pub seed_secret: Option<String>,
    pub token_secret: SigningSecret,
    pub token_ttl: Duration,
    pub hash_cost: u32,
}

impl DeskConfig {
    fn from_env(environment: AppEnvironment) -> Result<Self, ConfigError> {
        let audit_policy = match env::var("APP_AUDIT_POLICY") {
            Ok(raw) => AuditPolicy::parse(&raw).ok_or(ConfigError::InvalidAuditPolicy(raw))?,
            Err(_) => AuditPolicy::default(),
        };

        let lookup_timeout = match env::var("APP_LOOKUP_TIMEOUT_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidLookupTimeout),
            },
            Err(_) => DeskSettings::default().lookup_timeout,
        };

        let path = env::var("APP_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH));
        let store = match env::var("APP_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "sqlite" => StoreBackend::Sqlite { path },
            other => return Err(ConfigError::InvalidStore(other.to_string())),
        };

        let seed_fixtures = match env::var("APP_SEED_FIXTURES") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidSeedFlag)?,
            Err(_) => environment == AppEnvironment::Development,
        };
        let seed_secret = env::var("APP_SEED_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty());

        let token_secret = match env::var("APP_TOKEN_SECRET") {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingTokenSecret)
            }
            _ => DEVELOPMENT_TOKEN_SECRET.to_string(),
        };
        let token_ttl = match env::var("APP_TOKEN_TTL_MINS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(mins) if mins > 0 => Duration::from_secs(mins.saturating_mul(60)),
                _ => return Err(ConfigError::InvalidTokenTtl),
            },
            Err(_) => DEFAULT_TOKEN_TTL,
        };
        let hash_cost = match env::var("APP_SECRET_HASH_COST") {
            Ok(raw) => match raw.trim().parse::<u32>() {
                Ok(cost) if (MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) => cost,
                _ => return Err(ConfigError::InvalidHashCost),
            },
            Err(_) => DEFAULT_HASH_COST,
        };

        Ok(Self {
            store,
            audit_policy,
            lookup_timeout,
            seed_fixtures,
            seed_secret,
            token_secret: SigningSecret(token_secret),
            token_ttl,
            hash_cost,
        })
    }

    pub fn token_issuer(&self) -> TokenIssuer {
        TokenIssuer::new(self.token_secret.0.as_bytes(), self.token_ttl)
    }

    pub fn hasher(&self) -> BcryptHasher {
        BcryptHasher::with_cost(self.hash_cost)
    }

    pub fn settings(&self) -> DeskSettings {
        DeskSettings {
            audit_policy: self.audit_policy,
            lookup_timeout: self.lookup_timeout,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAuditPolicy(String),
    InvalidLookupTimeout,
    InvalidStore(String),
    InvalidSeedFlag,
    MissingTokenSecret,
    InvalidTokenTtl,
    InvalidHashCost,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAuditPolicy(value) => {
                write!(f, "APP_AUDIT_POLICY must be strict or lenient, got '{value}'")
            }
            ConfigError::InvalidLookupTimeout => {
                write!(f, "APP_LOOKUP_TIMEOUT_SECS must be a positive whole number")
            }
            ConfigError::InvalidStore(value) => {
                write!(f, "APP_STORE must be memory or sqlite, got '{value}'")
            }
            ConfigError::InvalidSeedFlag => write!(f, "APP_SEED_FIXTURES must be true or false"),
            ConfigError::MissingTokenSecret => {
                write!(f, "APP_TOKEN_SECRET is required in production")
            }
            ConfigError::InvalidTokenTtl => {
                write!(f, "APP_TOKEN_TTL_MINS must be a positive whole number")
            }
            ConfigError::InvalidHashCost => {
                write!(f, "APP_SECRET_HASH_COST must be between 4 and 31")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "APP_AUDIT_POLICY",
            "APP_LOOKUP_TIMEOUT_SECS",
            "APP_STORE",
            "APP_DATABASE_PATH",
            "APP_SEED_FIXTURES",
            "APP_SEED_SECRET",
            "APP_TOKEN_SECRET",
            "APP_TOKEN_TTL_MINS",
            "APP_SECRET_HASH_COST",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.desk.store, StoreBackend::Memory);
        assert_eq!(config.desk.audit_policy, AuditPolicy::Lenient);
        assert_eq!(config.desk.lookup_timeout, Duration::from_secs(30));
        assert!(config.desk.seed_fixtures);
        assert!(config.desk.seed_secret.is_none());
        assert_eq!(config.desk.token_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.desk.hasher().cost(), 10);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_sqlite_store_and_strict_policy() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_STORE", "SQLite");
        env::set_var("APP_DATABASE_PATH", "/var/lib/desk/credit.db");
        env::set_var("APP_AUDIT_POLICY", "strict");
        env::set_var("APP_LOOKUP_TIMEOUT_SECS", "5");
        env::set_var("APP_TOKEN_SECRET", "rotated-production-key");
        let config = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(
            config.desk.store,
            StoreBackend::Sqlite {
                path: PathBuf::from("/var/lib/desk/credit.db")
            }
        );
        let settings = config.desk.settings();
        assert_eq!(settings.audit_policy, AuditPolicy::Strict);
        assert_eq!(settings.lookup_timeout, Duration::from_secs(5));
        assert!(!config.desk.seed_fixtures, "production does not seed by default");
    }

    #[test]
    fn rejects_unknown_audit_policy_and_zero_timeout() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_AUDIT_POLICY", "sometimes");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidAuditPolicy(value)) if value == "sometimes"
        ));

        reset_env();
        env::set_var("APP_LOOKUP_TIMEOUT_SECS", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidLookupTimeout)
        ));
        reset_env();
    }

    #[test]
    fn production_requires_a_token_secret() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::MissingTokenSecret)
        ));

        env::set_var("APP_TOKEN_SECRET", "   ");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::MissingTokenSecret)
        ));
        reset_env();
    }

    #[test]
    fn token_and_hash_settings_are_read() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_TOKEN_SECRET", "staging-key");
        env::set_var("APP_TOKEN_TTL_MINS", "90");
        env::set_var("APP_SECRET_HASH_COST", "12");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.desk.token_ttl, Duration::from_secs(90 * 60));
        assert_eq!(config.desk.token_issuer().ttl(), Duration::from_secs(90 * 60));
        assert_eq!(config.desk.hasher().cost(), 12);
        assert!(!format!("{:?}", config.desk).contains("staging-key"));

        env::set_var("APP_TOKEN_TTL_MINS", "0");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidTokenTtl)));

        env::set_var("APP_TOKEN_TTL_MINS", "90");
        env::set_var("APP_SECRET_HASH_COST", "40");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidHashCost)));
        reset_env();
    }
}
