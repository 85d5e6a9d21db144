use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub fares: FareConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub currency: String,
    #[serde(default = "default_reserve_attempts")]
    pub max_reserve_attempts: u32,
    pub booking_deadline_ms: u64,
    pub pending_booking_ttl_secs: u64,
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_reserve_attempts() -> u32 { 3 }
fn default_rate_limit() -> i64 { 100 }

/// Fare multipliers in percent of the schedule's base fare.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FareConfig {
    pub adult: u32,
    pub child: u32,
    pub infant: u32,
    pub senior: u32,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self { adult: 100, child: 50, infant: 0, senior: 80 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Machine-local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `FERRY__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("FERRY").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 8080

        [storage]
        backend = "memory"

        [auth]
        jwt_secret = "dev-secret"
        jwt_expiration_seconds = 3600

        [business_rules]
        currency = "USD"
        booking_deadline_ms = 5000
        pending_booking_ttl_secs = 900
        reconcile_interval_secs = 60
    "#;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config = Config::from_toml(SAMPLE).expect("config should parse");

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert_eq!(config.business_rules.max_reserve_attempts, 3);
        assert_eq!(config.business_rules.rate_limit_per_minute, 100);
        assert_eq!(config.fares, FareConfig::default());
    }

    #[test]
    fn test_fare_overrides() {
        let source = format!("{}\n[fares]\nadult = 100\nchild = 60\ninfant = 10\nsenior = 75\n", SAMPLE);
        let config = Config::from_toml(&source).expect("config should parse");

        assert_eq!(config.fares.child, 60);
        assert_eq!(config.fares.senior, 75);
    }
}
