//! Configuration loader with layered sources.

use crate::{ConfigError, WorkqConfig};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loads [`WorkqConfig`] from layered sources.
///
/// Sources are applied in order, later ones overriding earlier ones:
/// 1. `{dir}/default.toml`
/// 2. `{dir}/{environment}.toml`
/// 3. `{dir}/local.toml`
/// 4. Environment variables with the `WORKQ` prefix and `__` separator,
///    e.g. `WORKQ__REDIS__URL` or `WORKQ__WORKER__QUEUES=email,default`
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Creates a loader for the given directory.
    ///
    /// The environment name comes from `WORKQ_ENVIRONMENT` (default `development`).
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let environment =
            std::env::var("WORKQ_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        Self {
            config_dir: config_dir.into(),
            environment,
        }
    }

    /// Creates a loader for `./config`.
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Overrides the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<WorkqConfig, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }

        info!(
            environment = %self.environment,
            dir = %self.config_dir.display(),
            "Loading configuration"
        );

        let mut builder = Config::builder();
        for name in ["default", self.environment.as_str(), "local"] {
            let path = self.config_dir.join(format!("{name}.toml"));
            if Path::new(&path).exists() {
                debug!(path = %path.display(), "Adding config file");
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("WORKQ")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("worker.queues")
                .try_parsing(true),
        );

        let config: WorkqConfig = builder.build()?.try_deserialize()?;
        validate(&config)?;
        Ok(config)
    }
}

/// Validates cross-field constraints the types cannot express.
pub fn validate(config: &WorkqConfig) -> Result<(), ConfigError> {
    if config.redis.url.trim().is_empty() {
        return Err(ConfigError::Invalid("redis.url must not be empty".to_string()));
    }
    if config.redis.key_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid("redis.key_prefix must not be empty".to_string()));
    }
    if config.database.url.trim().is_empty() {
        return Err(ConfigError::Invalid("database.url must not be empty".to_string()));
    }

    let worker = &config.worker;
    if worker.queues.is_empty() || worker.queues.iter().any(|q| q.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "worker.queues must list at least one non-empty queue name".to_string(),
        ));
    }
    if worker.max_jobs_per_batch == 0 {
        return Err(ConfigError::Invalid("worker.max_jobs_per_batch must be positive".to_string()));
    }
    if !(worker.resource_threshold > 0.0 && worker.resource_threshold <= 1.0) {
        return Err(ConfigError::Invalid(format!(
            "worker.resource_threshold must be in (0, 1], got {}",
            worker.resource_threshold
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&WorkqConfig::default()).is_ok());
    }

    #[test]
    fn test_loads_layered_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[worker]\nqueues = [\"email\", \"default\"]\nmax_jobs_per_batch = 25\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[redis]\nkey_prefix = \"staging-jobs\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new(dir.path())
            .with_environment("staging")
            .load()
            .unwrap();

        assert_eq!(config.worker.queues, vec!["email", "default"]);
        assert_eq!(config.worker.max_jobs_per_batch, 25);
        assert_eq!(config.redis.key_prefix, "staging-jobs");
        assert_eq!(config.redis.pool_size, 10);
    }

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new(dir.path().join("absent"))
            .with_environment("test")
            .load()
            .unwrap();
        assert_eq!(config.worker.queues, vec!["default"]);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = WorkqConfig::default();
        config.worker.resource_threshold = 1.5;
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_empty_queue_list() {
        let mut config = WorkqConfig::default();
        config.worker.queues.clear();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("worker.queues"));
    }
}
