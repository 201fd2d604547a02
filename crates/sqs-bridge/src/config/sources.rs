//! Configuration sources read by the resolver.
//!
//! Two layers exist: store-scoped administrative configuration (flat paths such
//! as `system/sqs/region`) and environment/deployment configuration (a nested
//! document with a `queue.sqs` section). Both are injected into
//! [`ConfigResolver`](super::ConfigResolver) as trait objects.

use crate::error::ConfigurationError;
use std::collections::HashMap;

/// Store-scoped administrative configuration
#[cfg_attr(test, mockall::automock)]
pub trait AdminConfigSource: Send + Sync {
    /// Value stored for a configuration path in the default store scope
    fn get_value(&self, path: &str) -> Option<String>;
}

/// Environment/deployment configuration
#[cfg_attr(test, mockall::automock)]
pub trait DeploymentConfigSource: Send + Sync {
    /// Top-level section of the deployment configuration, e.g. `queue`
    fn get_config_data(&self, section: &str) -> Option<serde_json::Value>;
}

/// Administrative configuration held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticAdminConfig {
    values: HashMap<String, String>,
}

impl StaticAdminConfig {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Read the `admin` table of a settings document.
    ///
    /// A missing table yields an empty source.
    pub fn from_config(config: &config::Config) -> Result<Self, ConfigurationError> {
        match config.get::<HashMap<String, String>>("admin") {
            Ok(values) => Ok(Self::new(values)),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigurationError::Parsing {
                key: "admin".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Set a value, replacing any existing one
    pub fn with_value(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(path.into(), value.into());
        self
    }
}

impl AdminConfigSource for StaticAdminConfig {
    fn get_value(&self, path: &str) -> Option<String> {
        self.values.get(path).cloned()
    }
}

/// Deployment configuration held in memory as a JSON document
#[derive(Debug, Clone)]
pub struct StaticDeploymentConfig {
    document: serde_json::Value,
}

impl StaticDeploymentConfig {
    pub fn new(document: serde_json::Value) -> Self {
        Self { document }
    }

    /// Capture the `queue` section of a settings document.
    pub fn from_config(config: &config::Config) -> Result<Self, ConfigurationError> {
        let queue = match config.get::<serde_json::Value>("queue") {
            Ok(value) => value,
            Err(config::ConfigError::NotFound(_)) => serde_json::Value::Null,
            Err(e) => {
                return Err(ConfigurationError::Parsing {
                    key: "queue".to_string(),
                    message: e.to_string(),
                })
            }
        };

        Ok(Self::new(serde_json::json!({ "queue": queue })))
    }
}

impl Default for StaticDeploymentConfig {
    fn default() -> Self {
        Self::new(serde_json::Value::Object(Default::default()))
    }
}

impl DeploymentConfigSource for StaticDeploymentConfig {
    fn get_config_data(&self, section: &str) -> Option<serde_json::Value> {
        self.document
            .get(section)
            .filter(|value| !value.is_null())
            .cloned()
    }
}
