//! Configuration loader with layered sources.

use crate::{format_validation_errors, AppConfig, ConfigError, ConfigValidator};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Environment variable selecting the environment-specific config file.
pub const ENVIRONMENT_VAR: &str = "JOBLINE_ENVIRONMENT";

/// Prefix of configuration environment variables (`JOBLINE__SERVER__PORT`).
pub const ENV_PREFIX: &str = "JOBLINE";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `JOBLINE__` prefix
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ConfigError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }

    fn load_config(config_dir: &Path) -> Result<AppConfig, ConfigError> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        info!(environment = %environment, dir = %config_dir.display(), "Loading configuration");

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = config_dir.join(format!("{}.toml", name));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder.build()?.try_deserialize()?;

        ConfigValidator::validate(&app_config)
            .map_err(|errors| ConfigError::Invalid(format_validation_errors(&errors)))?;

        if app_config.app.environment == "production" && !app_config.database.is_persistent() {
            warn!("No database configured in production; jobs will not survive a restart");
        }

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_empty_directory_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.get().await;

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.engine.simulation.step, 20);
    }

    #[tokio::test]
    async fn test_local_overrides_default() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "default.toml",
            "[engine.retry]\nbase_delay_ms = 250\nmax_delay_units = 30\n",
        );
        write(&dir, "local.toml", "[engine.retry]\nmax_delay_units = 10\n");

        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.get().await;

        assert_eq!(config.engine.retry.base_delay_ms, 250);
        assert_eq!(config.engine.retry.max_delay_units, 10);
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[engine.simulation]\nsuccess_rate = 2.0\n");

        let err = ConfigLoader::new(dir.path()).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("engine.simulation.success_rate"));
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[server\nport = ");

        let err = ConfigLoader::new(dir.path()).err().unwrap();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[tokio::test]
    async fn test_env_var_overrides_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[engine.hub]\nsubscriber_buffer = 16\n");

        std::env::set_var("JOBLINE__ENGINE__HUB__SUBSCRIBER_BUFFER", "32");
        let loaded = ConfigLoader::new(dir.path());
        std::env::remove_var("JOBLINE__ENGINE__HUB__SUBSCRIBER_BUFFER");

        assert_eq!(loaded.unwrap().get().await.engine.hub.subscriber_buffer, 32);
    }

    #[tokio::test]
    async fn test_reload_and_get_value() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[server]\nport = 9100\n");
        let loader = ConfigLoader::new(dir.path()).unwrap();
        assert_eq!(loader.get_value::<u16>("server.port").await, Some(9100));

        write(&dir, "default.toml", "[server]\nport = 9200\n");
        loader.reload().await.unwrap();
        assert_eq!(loader.get_value::<u16>("server.port").await, Some(9200));
        assert_eq!(loader.get_value::<u16>("server.missing").await, None);
    }
}
