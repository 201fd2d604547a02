//! # Configuration Resolution
//!
//! Resolves SQS connection settings and the queue name mapping table from two
//! ordered layers:
//!
//! 1. **Administrative configuration**: used only when
//!    `system/sqs/config_to_use` is `system`. Each non-empty field is read; the
//!    secret key is decrypted and the mapping table deserialized.
//! 2. **Deployment configuration**: the `queue.sqs` section, used wholesale
//!    when the administrative layer produced nothing.
//!
//! The fallback is all-or-nothing: if the administrative layer yields any field,
//! the deployment layer is not consulted at all. The result is computed at most
//! once per [`ConfigResolver`] and never recomputed afterwards.

use crate::error::ConfigurationError;
use crate::names_mapping::NamesMapping;
use crate::secret::{SecretDecryptor, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

mod sources;

pub use sources::{
    AdminConfigSource, DeploymentConfigSource, StaticAdminConfig, StaticDeploymentConfig,
};

#[cfg(test)]
pub use sources::{MockAdminConfigSource, MockDeploymentConfigSource};

/// Administrative path selecting the configuration layer
pub const CONFIG_TO_USE_PATH: &str = "system/sqs/config_to_use";

/// Administrative value of [`CONFIG_TO_USE_PATH`] that enables the administrative layer
pub const CONFIG_TO_USE_SYSTEM: &str = "system";

/// Administrative path of the serialized mapping table
pub const NAMES_MAPPING_PATH: &str = "system/sqs/names_mapping";

/// Deployment configuration section holding queue settings
pub const QUEUE_SECTION: &str = "queue";

/// Subsection of [`QUEUE_SECTION`] holding SQS settings
pub const SQS_SECTION: &str = "sqs";

/// Individual SQS settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    Region,
    Version,
    AccessKey,
    SecretKey,
    Prefix,
    Endpoint,
    MessageGroupId,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        Self::Region,
        Self::Version,
        Self::AccessKey,
        Self::SecretKey,
        Self::Prefix,
        Self::Endpoint,
        Self::MessageGroupId,
    ];

    /// Key name inside the deployment `queue.sqs` section
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Version => "version",
            Self::AccessKey => "access_key",
            Self::SecretKey => "secret_key",
            Self::Prefix => "prefix",
            Self::Endpoint => "endpoint",
            Self::MessageGroupId => "message_group_id",
        }
    }

    /// Path in administrative configuration, if the setting is stored there
    pub fn admin_path(&self) -> Option<&'static str> {
        match self {
            Self::Region => Some("system/sqs/region"),
            Self::Version => Some("system/sqs/version"),
            Self::AccessKey => Some("system/sqs/access_key"),
            Self::SecretKey => Some("system/sqs/secret_key"),
            Self::MessageGroupId => Some("system/sqs/message_group_id"),
            Self::Prefix | Self::Endpoint => None,
        }
    }

    fn from_deployment_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer that produced a [`ResolvedConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    System,
    Deployment,
}

/// Settings resolved from one configuration layer
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    source: ConfigSource,
    values: BTreeMap<ConfigKey, String>,
    secret_key: Option<SecretString>,
    names_mapping: NamesMapping,
}

impl ResolvedConfig {
    fn empty(source: ConfigSource) -> Self {
        Self {
            source,
            values: BTreeMap::new(),
            secret_key: None,
            names_mapping: NamesMapping::default(),
        }
    }

    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Value of a setting. The secret key is returned in plaintext.
    pub fn get(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::SecretKey => self.secret_key.as_ref().map(|s| s.expose_secret()),
            _ => self.values.get(&key).map(String::as_str),
        }
    }

    pub fn secret_key(&self) -> Option<&SecretString> {
        self.secret_key.as_ref()
    }

    pub fn names_mapping(&self) -> &NamesMapping {
        &self.names_mapping
    }

    /// True when no setting and no mapping entry was resolved
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.secret_key.is_none() && self.names_mapping.is_empty()
    }
}

/// Resolves and caches SQS settings for the lifetime of the instance.
///
/// Construct one per process or worker and share it via `Arc`.
pub struct ConfigResolver {
    admin: Arc<dyn AdminConfigSource>,
    deployment: Arc<dyn DeploymentConfigSource>,
    decryptor: Arc<dyn SecretDecryptor>,
    resolved: OnceLock<ResolvedConfig>,
}

impl ConfigResolver {
    pub fn new(
        admin: Arc<dyn AdminConfigSource>,
        deployment: Arc<dyn DeploymentConfigSource>,
        decryptor: Arc<dyn SecretDecryptor>,
    ) -> Self {
        Self {
            admin,
            deployment,
            decryptor,
            resolved: OnceLock::new(),
        }
    }

    /// Value of a single setting; `None` when it is not configured.
    ///
    /// # Errors
    ///
    /// Returns an error if administrative data is malformed (undecryptable secret,
    /// unparseable mapping table, malformed deployment section).
    pub fn get_value(&self, key: ConfigKey) -> Result<Option<String>, ConfigurationError> {
        Ok(self.resolved()?.get(key).map(str::to_string))
    }

    /// The decrypted secret key, if one is configured
    pub fn secret_key(&self) -> Result<Option<SecretString>, ConfigurationError> {
        Ok(self.resolved()?.secret_key().cloned())
    }

    /// The resolved mapping table; empty when none is configured
    pub fn names_mapping(&self) -> Result<&NamesMapping, ConfigurationError> {
        Ok(self.resolved()?.names_mapping())
    }

    /// Resolve all settings, loading them on first use.
    ///
    /// Failures are not cached; a later call will try again.
    pub fn resolved(&self) -> Result<&ResolvedConfig, ConfigurationError> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved);
        }

        let loaded = match self.load_system_config()? {
            Some(system) => system,
            None => self.load_deployment_config()?,
        };

        info!(
            source = ?loaded.source(),
            settings = loaded.values.len() + usize::from(loaded.secret_key.is_some()),
            mapped_queues = loaded.names_mapping().len(),
            "Resolved SQS configuration"
        );

        Ok(self.resolved.get_or_init(|| loaded))
    }

    /// Read the administrative layer when it is selected.
    ///
    /// Returns `None` if the layer is not selected or holds no data.
    fn load_system_config(&self) -> Result<Option<ResolvedConfig>, ConfigurationError> {
        let selected = self
            .admin
            .get_value(CONFIG_TO_USE_PATH)
            .is_some_and(|value| value.trim() == CONFIG_TO_USE_SYSTEM);
        if !selected {
            debug!("Administrative SQS configuration not selected");
            return Ok(None);
        }

        let mut resolved = ResolvedConfig::empty(ConfigSource::System);

        for key in ConfigKey::ALL {
            let Some(path) = key.admin_path() else {
                continue;
            };
            let Some(value) = self.admin_value(path) else {
                continue;
            };

            if key == ConfigKey::SecretKey {
                resolved.secret_key = Some(self.decryptor.decrypt(path, &value)?);
            } else {
                resolved.values.insert(key, value);
            }
        }

        if let Some(serialized) = self.admin_value(NAMES_MAPPING_PATH) {
            resolved.names_mapping = NamesMapping::from_json(NAMES_MAPPING_PATH, &serialized)?;
        }

        if resolved.is_empty() {
            debug!("Administrative SQS configuration selected but empty");
            return Ok(None);
        }

        Ok(Some(resolved))
    }

    /// Read the `queue.sqs` deployment section wholesale
    fn load_deployment_config(&self) -> Result<ResolvedConfig, ConfigurationError> {
        let mut resolved = ResolvedConfig::empty(ConfigSource::Deployment);

        let section = self
            .deployment
            .get_config_data(QUEUE_SECTION)
            .and_then(|queue| queue.get(SQS_SECTION).cloned());

        let entries = match section {
            None | Some(serde_json::Value::Null) => return Ok(resolved),
            Some(serde_json::Value::Object(entries)) => entries,
            Some(_) => {
                return Err(ConfigurationError::Parsing {
                    key: format!("{}.{}", QUEUE_SECTION, SQS_SECTION),
                    message: "expected a table of settings".to_string(),
                })
            }
        };

        for (name, value) in entries {
            let Some(key) = ConfigKey::from_deployment_key(&name) else {
                debug!(key = %name, "Ignoring unknown deployment SQS setting");
                continue;
            };

            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => continue,
                _ => {
                    warn!(key = %name, "Ignoring non-scalar deployment SQS setting");
                    continue;
                }
            };

            if key == ConfigKey::SecretKey {
                resolved.secret_key = Some(SecretString::new(value));
            } else {
                resolved.values.insert(key, value);
            }
        }

        Ok(resolved)
    }

    /// Administrative value, treating empty strings as absent
    fn admin_value(&self, path: &str) -> Option<String> {
        self.admin
            .get_value(path)
            .filter(|value| !value.trim().is_empty())
    }
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
