use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_CACHE_CAPACITY: usize = 1000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Cache configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of in-memory cache entries
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Default TTL for cache entries in seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Disable caching entirely; the engine must stay correct without it
    #[serde(default)]
    pub disabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            default_ttl_secs: default_cache_ttl(),
            disabled: false,
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Maximum number of pooled database connections
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of pooled database connections
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    /// Deployment environment name ("development", "staging", "production")
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level filter ("trace" .. "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_min_connections() -> u32 {
    DEFAULT_MIN_CONNECTIONS
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl AppConfig {
    /// Loads configuration from `config/default.toml`, an optional
    /// per-environment file (`config/{environment}.toml`), and `APP__`
    /// prefixed environment variables, later sources overriding earlier ones.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("APP__ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder();

        let default_path = Path::new(CONFIG_DIR).join("default.toml");
        if default_path.exists() {
            builder = builder.add_source(File::from(default_path));
        }
        let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }

        let config = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(app_config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_defaults_are_sane() {
        let cache = CacheConfig::default();
        assert_eq!(cache.capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(cache.default_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert!(!cache.disabled);
    }

    #[test]
    fn config_loads_from_environment() {
        std::env::set_var("APP__DATABASE_URL", "sqlite::memory:");
        let config = AppConfig::load().expect("config should load from env");
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.db_max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(!config.is_production());
        std::env::remove_var("APP__DATABASE_URL");
    }

    #[test]
    fn empty_database_url_fails_validation() {
        let config = AppConfig {
            database_url: String::new(),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            db_min_connections: DEFAULT_MIN_CONNECTIONS,
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            cache: CacheConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
