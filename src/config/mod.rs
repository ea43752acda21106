// Configuration module
//
// One YAML document, loaded once at startup. `${VAR}` references are replaced
// with environment variables before parsing, and the whole document is
// validated before any component is built.

pub mod access_log;
pub mod identities;
pub mod rate_limit;
pub mod redis;
pub mod retry;
pub mod server;
pub mod storage;
pub mod tiers;

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::redis::RedisConfig;
pub use access_log::AccessLogConfig;
pub use identities::{CatalogConfig, IdentitiesConfig};
pub use rate_limit::{CounterBackend, RateLimitConfigYaml};
pub use retry::RetryConfigYaml;
pub use server::ServerConfig;
pub use storage::StorageConfig;
pub use tiers::TiersConfig;

use crate::cache::{CacheIndexBackend, WatermarkCacheConfig};
use crate::detector::DetectorConfig;
use crate::identity::SessionConfig;
use crate::logging::LoggingConfig;
use crate::watermark::WatermarkConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Environment variable '{0}' is referenced but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session tokens; without it every request is anonymous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(default)]
    pub tiers: TiersConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfigYaml,

    pub watermark: WatermarkConfig,

    #[serde(default)]
    pub cache: WatermarkCacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,

    #[serde(default)]
    pub access_log: AccessLogConfig,

    #[serde(default)]
    pub identities: IdentitiesConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, ConfigError> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            if std::env::var(var_name).is_err() {
                return Err(ConfigError::MissingEnvVar(var_name.to_string()));
            }
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_with_env(&yaml)
    }

    /// Load, then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sections().map_err(ConfigError::Invalid)
    }

    fn validate_sections(&self) -> Result<(), String> {
        self.server.validate()?;
        self.logging.validate()?;
        if let Some(session) = &self.session {
            session.validate()?;
        }
        self.tiers.validate()?;
        self.rate_limit.validate()?;
        self.watermark.validate()?;
        self.cache.validate()?;
        self.storage.validate()?;
        self.detector.validate()?;
        self.access_log.validate()?;
        self.identities.validate()?;
        self.catalog.validate()?;

        match &self.redis {
            Some(redis) => redis.validate()?,
            None => {
                if self.rate_limit.backend == CounterBackend::Redis {
                    return Err("rate_limit.backend is redis but no redis section is set".to_string());
                }
                if self.cache.index == CacheIndexBackend::Redis {
                    return Err("cache.index is redis but no redis section is set".to_string());
                }
            }
        }

        for asset in &self.catalog.assets {
            if asset.min_tier_rank > 0
                && !self
                    .tiers
                    .policies
                    .iter()
                    .any(|p| p.rank >= asset.min_tier_rank)
            {
                return Err(format!(
                    "catalog.assets.{}: no tier has rank >= {}",
                    asset.id, asset.min_tier_rank
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RouteClass;
    use std::io::Write;

    const MINIMAL: &str = r#"
watermark:
  secret: test-secret
"#;

    const FULL: &str = r#"
server: { address: "127.0.0.1", port: 9090, trust_forwarded_for: true, global_rps: 2000 }
logging: { level: "info,kagami=debug", format: json }
session: { jwt_secret: "${KAGAMI_TEST_JWT_SECRET}", cookie_name: session }
tiers:
  anonymous_tier: null
  policies:
    - { tier_name: bronze, clean_access: false, rank: 1, rate_multiplier: 1.0 }
    - { tier_name: gold,   clean_access: true,  rank: 3, rate_multiplier: 2.0 }
rate_limit:
  backend: redis
  route_classes:
    image_view:  { quota: 120, window_secs: 60, tier_multiplier: true }
    download:    { quota: 20,  window_secs: 60, tier_multiplier: true }
    auth:        { quota: 10,  window_secs: 60, tier_multiplier: false }
    generic_api: { quota: 300, window_secs: 60, tier_multiplier: true }
watermark: { secret: "${KAGAMI_TEST_MARK_SECRET}", output_format: jpeg, quality: 85, opacity: 0.35,
             font_path: null, overlay: null, max_pixels: 50000000 }
cache: { ttl_secs: 86400, sweep_interval_secs: 60, grace_secs: 300, sweep_batch: 500,
         index: redis, blobs: { backend: memory, max_size_mb: 512 } }
storage:
  originals: { backend: s3, bucket: originals, region: us-east-1, endpoint: "http://localhost:4566" }
  retry: { max_attempts: 3, initial_backoff_ms: 50, max_backoff_ms: 1000 }
detector: { distinct_window_secs: 60, distinct_asset_threshold: 50, downloads_per_minute: 30,
            velocity_minutes: 5, enumeration_run: 20, retention_secs: 604800, block_ttl_secs: 3600 }
redis: { url: "redis://localhost:6379", key_prefix: kagami }
access_log: { channel_capacity: 10000, prune_interval_secs: 300 }
identities:
  backend: memory
  seed:
    - { id: alice, tier: bronze, standing: active }
catalog:
  assets:
    - { id: a1, storage_key: originals/a1.jpg, width: 800, height: 600, owning_collection_id: c1, min_tier_rank: 1 }
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml_with_env(MINIMAL).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert!(config.session.is_none());
        assert!(config.redis.is_none());
        assert_eq!(config.rate_limit.backend, CounterBackend::Memory);
        assert_eq!(config.identities.backend_name(), "memory");
        assert_eq!(config.storage.originals.backend_name(), "memory");
    }

    #[test]
    fn test_full_config_with_env_substitution() {
        std::env::set_var("KAGAMI_TEST_JWT_SECRET", "jwt-from-env");
        std::env::set_var("KAGAMI_TEST_MARK_SECRET", "mark-from-env");

        let config = Config::from_yaml_with_env(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.session.as_ref().unwrap().jwt_secret, "jwt-from-env");
        assert_eq!(config.watermark.secret, "mark-from-env");
        assert_eq!(config.server.global_rps, Some(2000));
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.tiers.policies.len(), 2);
        assert_eq!(config.rate_limit.route_classes[&RouteClass::Download].quota, 20);
        assert_eq!(config.cache.index, CacheIndexBackend::Redis);
        assert_eq!(config.redis.as_ref().unwrap().key_prefix, "kagami");
        assert_eq!(config.catalog.assets[0].min_tier_rank, 1);
    }

    #[test]
    fn test_missing_env_var_is_reported() {
        let yaml = "watermark:\n  secret: \"${KAGAMI_TEST_DEFINITELY_UNSET}\"";
        match Config::from_yaml_with_env(yaml) {
            Err(ConfigError::MissingEnvVar(name)) => {
                assert_eq!(name, "KAGAMI_TEST_DEFINITELY_UNSET")
            }
            other => panic!("expected MissingEnvVar, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_watermark_section_is_required() {
        assert!(matches!(
            Config::from_yaml_with_env("server: { port: 8080 }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_redis_backends_require_redis_section() {
        let yaml = format!("{}\nrate_limit:\n  backend: redis\n", MINIMAL);
        let config = Config::from_yaml_with_env(&yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis"));

        let yaml = format!("{}\ncache:\n  index: redis\n", MINIMAL);
        let config = Config::from_yaml_with_env(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreachable_asset_rank_rejected() {
        let yaml = format!(
            "{}\ncatalog:\n  assets:\n    - {{ id: a1, storage_key: k, width: 1, height: 1, owning_collection_id: c, min_tier_rank: 9 }}\n",
            MINIMAL
        );
        let config = Config::from_yaml_with_env(&yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.watermark.secret, "test-secret");

        assert!(matches!(
            Config::load("/nonexistent/kagami.yaml"),
            Err(ConfigError::Read(_))
        ));
    }
}
