//! Configuration Loader
//!
//! Environment-aware configuration loading. A YAML file provides the base values and
//! `DAPI__`-prefixed environment variables override them, e.g.
//! `DAPI__CLUSTER__NODE_NAME=worker1`.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::DapiConfig;
use crate::error::Result;

const ENV_PREFIX: &str = "DAPI";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: DapiConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from environment variables only
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::build(None)
    }

    /// Load configuration from a YAML file, then apply environment overrides
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Arc<ConfigManager>> {
        Self::build(Some(path.as_ref().to_path_buf()))
    }

    fn build(source: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        let mut builder = Config::builder();
        if let Some(path) = &source {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("basic_services")
                .with_list_parse_key("str_priority"),
        );

        let config: DapiConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            node_name = %config.cluster.node_name,
            node_type = ?config.cluster.node_type,
            cluster_enabled = config.cluster.enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source,
        }))
    }

    /// Wrap an already built configuration
    pub fn from_config(config: DapiConfig) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DapiConfig {
        &self.config
    }

    /// Environment the configuration was loaded for
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Detect the current environment
    pub fn detect_environment() -> String {
        env::var("DAPI_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
