//! Hotswap engine configuration, read from TOML.
//!
//! ```toml
//! max_concurrency = 4
//! wait_for_lambda_update = true
//!
//! [ecs]
//! minimum_healthy_percent = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::environment::EcsDeploymentSettings;
use super::error::HotswapError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotswapConfig {
    /// Operations in flight at the same time while applying
    pub max_concurrency: usize,
    /// Wait for a function to finish updating after a code update, before the next call
    pub wait_for_lambda_update: bool,
    pub lambda_update_timeout_secs: u64,
    pub lambda_poll_interval_millis: u64,
    pub ecs: EcsConfig,
    pub environment: EnvironmentConfig,
}

impl Default for HotswapConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            wait_for_lambda_update: true,
            lambda_update_timeout_secs: 300,
            lambda_poll_interval_millis: 1000,
            ecs: EcsConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsConfig {
    pub minimum_healthy_percent: Option<i32>,
    pub maximum_healthy_percent: Option<i32>,
}

/// Partition-level settings not available from the SDK configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub partition: String,
    pub url_suffix: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            partition: "aws".to_string(),
            url_suffix: "amazonaws.com".to_string(),
        }
    }
}

impl HotswapConfig {
    /// Load the configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, HotswapError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HotswapError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, HotswapError> {
        let config: HotswapConfig =
            toml::from_str(content).map_err(|e| HotswapError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HotswapError> {
        if self.max_concurrency == 0 {
            return Err(HotswapError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.lambda_poll_interval_millis == 0 {
            return Err(HotswapError::Config(
                "lambda_poll_interval_millis must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lambda_update_timeout(&self) -> Duration {
        Duration::from_secs(self.lambda_update_timeout_secs)
    }

    pub fn lambda_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lambda_poll_interval_millis)
    }

    pub fn ecs_deployment_settings(&self) -> EcsDeploymentSettings {
        EcsDeploymentSettings {
            minimum_healthy_percent: self.ecs.minimum_healthy_percent,
            maximum_healthy_percent: self.ecs.maximum_healthy_percent,
        }
    }
}
