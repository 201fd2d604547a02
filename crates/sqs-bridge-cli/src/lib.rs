//! # SQS Bridge CLI
//!
//! Command-line interface for inspecting and exercising the SQS bridge.
//!
//! This module provides CLI commands for:
//! - Showing the resolved configuration and mapping table
//! - Resolving logical queue names to physical queues
//! - Pushing and consuming messages
//! - Encrypting secrets for administrative configuration
//!
//! Settings are layered from `/etc/sqs-bridge/settings.*`, `./sqs-bridge.*`,
//! an explicit `--config` file and `SQS_BRIDGE__*` environment variables
//! (e.g. `SQS_BRIDGE__QUEUE__SQS__REGION=eu-west-1`).

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sqs_bridge::{
    AesGcmSecretCipher, ConfigKey, ConfigResolver, ConfigSource, ConfigurationError,
    ConnectionFactory, ConnectionProvider, Envelope, FixedTransportFactory,
    HttpConnectionFactory, InMemorySqsTransport, MessageQueue, NamesMapping,
    PrefixedQueueNameFormatter, QueueAdapter, QueueError, SecretDecryptor, SecretString,
    StaticAdminConfig, StaticDeploymentConfig,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// CLI Structure
// ============================================================================

/// SQS Bridge CLI - run application queues against Amazon SQS
#[derive(Parser)]
#[command(name = "sqs-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and exercise SQS backed application queues")]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, env = "SQS_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Use a process-local in-memory queue service instead of SQS
    #[arg(long)]
    pub dry_run: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show the physical queue a logical queue name resolves to
    Remap {
        /// Logical queue name
        logical: String,
    },

    /// Publish a message
    Push {
        /// Logical queue name
        queue: String,

        /// Message body
        #[arg(short, long)]
        body: String,

        /// Message property as key=value, may be repeated
        #[arg(short, long = "property")]
        properties: Vec<String>,
    },

    /// Print messages as they arrive; Ctrl-C stops
    Consume {
        /// Logical queue name
        queue: String,

        /// Stop after this many messages
        #[arg(short, long)]
        max: Option<usize>,

        /// Acknowledge each message after printing it
        #[arg(short, long)]
        ack: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Encrypt a secret for use as `system/sqs/secret_key`
    EncryptSecret {
        /// Plaintext secret
        plaintext: String,
    },
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Configuration(_) => 1,
            CliError::Queue(_) => 2,
            CliError::CommandFailed { .. } => 3,
            CliError::InvalidArgument { .. } => 4,
            CliError::Io(_) => 5,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] ConfigurationError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },
}

impl From<ConfigurationError> for CliError {
    fn from(error: ConfigurationError) -> Self {
        CliError::Configuration(ConfigError::Settings(error))
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// CLI settings read from the settings document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CliSettings {
    pub encryption: EncryptionSettings,
}

/// Key used for administrative secrets
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// Hex encoded AES-256 key
    pub key: Option<String>,
}

/// Load the layered settings document.
///
/// Later sources override earlier ones:
/// 1. `/etc/sqs-bridge/settings.{toml,yaml,json}`
/// 2. `./sqs-bridge.{toml,yaml,json}`
/// 3. `explicit_path`, which must exist when given
/// 4. `SQS_BRIDGE__*` environment variables
pub fn load_settings(explicit_path: Option<&Path>) -> Result<config::Config, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("/etc/sqs-bridge/settings").required(false))
        .add_source(config::File::with_name("sqs-bridge").required(false));

    if let Some(path) = explicit_path {
        info!(path = %path.display(), "Loading settings from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(config::Environment::with_prefix("SQS_BRIDGE").separator("__"))
        .build()?;
    Ok(settings)
}

/// Decryptor used when no encryption key is configured
struct MissingKeyDecryptor;

impl SecretDecryptor for MissingKeyDecryptor {
    fn decrypt(&self, key: &str, _ciphertext: &str) -> Result<SecretString, ConfigurationError> {
        Err(ConfigurationError::Decryption {
            key: key.to_string(),
            message: "no encryption.key configured".to_string(),
        })
    }
}

// ============================================================================
// Bridge Wiring
// ============================================================================

/// Resolver, connection and formatter built from one settings document
pub struct Bridge {
    resolver: Arc<ConfigResolver>,
    connections: Arc<ConnectionProvider>,
    formatter: Arc<PrefixedQueueNameFormatter>,
    cipher: Option<Arc<AesGcmSecretCipher>>,
}

impl Bridge {
    /// Wire the bridge from settings. With `dry_run` messages stay in memory.
    pub fn from_settings(settings: &config::Config, dry_run: bool) -> Result<Self, CliError> {
        let cli_settings: CliSettings = settings.clone().try_deserialize().map_err(ConfigError::Load)?;

        let cipher = match cli_settings.encryption.key.as_deref() {
            Some(key) if !key.is_empty() => Some(Arc::new(AesGcmSecretCipher::from_hex(key)?)),
            _ => None,
        };
        let decryptor: Arc<dyn SecretDecryptor> = match &cipher {
            Some(cipher) => cipher.clone(),
            None => Arc::new(MissingKeyDecryptor),
        };

        let resolver = Arc::new(ConfigResolver::new(
            Arc::new(StaticAdminConfig::from_config(settings)?),
            Arc::new(StaticDeploymentConfig::from_config(settings)?),
            decryptor,
        ));

        let factory: Arc<dyn ConnectionFactory> = if dry_run {
            Arc::new(FixedTransportFactory::new(Arc::new(InMemorySqsTransport::new())))
        } else {
            Arc::new(HttpConnectionFactory)
        };

        Ok(Self {
            connections: Arc::new(ConnectionProvider::new(resolver.clone(), factory)),
            formatter: Arc::new(PrefixedQueueNameFormatter::from_resolver(&resolver)?),
            resolver,
            cipher,
        })
    }

    /// Create an adapter for a logical queue
    pub fn adapter(&self, logical_name: &str) -> Result<QueueAdapter, CliError> {
        Ok(QueueAdapter::new(
            logical_name,
            self.connections.clone(),
            self.formatter.clone(),
        )?)
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let mut stdout = std::io::stdout();
    execute(cli, &mut stdout).await
}

/// Load settings and run the selected command, writing results to `out`
pub async fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;
    let bridge = Bridge::from_settings(&settings, cli.dry_run)?;

    match cli.command {
        Commands::Config {
            action: ConfigCommands::Show { format },
        } => execute_config_show(&bridge, format, out),
        Commands::Remap { logical } => execute_remap(&bridge, &logical, out),
        Commands::Push {
            queue,
            body,
            properties,
        } => execute_push(&bridge, &queue, body, &properties, out).await,
        Commands::Consume {
            queue,
            max,
            ack,
            format,
        } => {
            let shutdown = CancellationToken::new();
            let ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping");
                    ctrl_c.cancel();
                }
            });
            execute_consume(&bridge, &queue, max, ack, format, &shutdown, out).await
        }
        Commands::EncryptSecret { plaintext } => execute_encrypt_secret(&bridge, &plaintext, out),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments; `RUST_LOG` takes precedence
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("Failed to initialize logging: {}", e),
    })
}

/// Resolved configuration as shown by `config show`
#[derive(Debug, Serialize)]
pub struct ConfigReport<'a> {
    pub source: &'static str,
    pub settings: BTreeMap<&'static str, String>,
    pub names_mapping: &'a NamesMapping,
}

/// Execute `config show`
pub fn execute_config_show(
    bridge: &Bridge,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let resolved = bridge.resolver.resolved()?;

    let settings = ConfigKey::ALL
        .iter()
        .filter_map(|key| {
            let value = match key {
                ConfigKey::SecretKey => resolved.secret_key().map(|_| "[REDACTED]".to_string()),
                _ => resolved.get(*key).map(str::to_string),
            };
            value.map(|value| (key.as_str(), value))
        })
        .collect();

    let report = ConfigReport {
        source: match resolved.source() {
            ConfigSource::System => "system",
            ConfigSource::Deployment => "deployment",
        },
        settings,
        names_mapping: resolved.names_mapping(),
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).map_err(|e| {
                CliError::CommandFailed {
                    message: format!("Failed to serialize configuration: {}", e),
                }
            })?;
            writeln!(out, "{}", json)?;
        }
        OutputFormat::Text => {
            writeln!(out, "source: {}", report.source)?;
            for (key, value) in &report.settings {
                writeln!(out, "{}: {}", key, value)?;
            }
            if report.names_mapping.is_empty() {
                writeln!(out, "names_mapping: (none)")?;
            } else {
                writeln!(out, "names_mapping:")?;
                for entry in report.names_mapping.entries() {
                    writeln!(out, "  {} -> {}", entry.logical, entry.physical)?;
                }
            }
        }
    }

    Ok(())
}

/// Execute `remap`
pub fn execute_remap(bridge: &Bridge, logical: &str, out: &mut dyn Write) -> Result<(), CliError> {
    let adapter = bridge.adapter(logical)?;
    let handle = adapter.queue_handle()?;

    writeln!(out, "logical: {}", adapter.logical_name())?;
    writeln!(out, "remapped: {}", adapter.queue_name())?;
    writeln!(out, "physical: {}", handle.name())?;
    writeln!(out, "fifo: {}", handle.is_fifo())?;
    Ok(())
}

/// Split `key=value` property arguments
pub fn parse_properties(properties: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    properties
        .iter()
        .map(|property| match property.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(CliError::InvalidArgument {
                arg: "property".to_string(),
                message: format!("expected key=value, got '{}'", property),
            }),
        })
        .collect()
}

/// Execute `push`
pub async fn execute_push(
    bridge: &Bridge,
    queue: &str,
    body: String,
    properties: &[String],
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut envelope = Envelope::new(body);
    envelope.properties = parse_properties(properties)?;

    let adapter = bridge.adapter(queue)?;
    adapter.push(&envelope).await?;

    info!(queue = %queue, "Message pushed");
    writeln!(out, "pushed to {}", adapter.queue_handle()?)?;
    Ok(())
}

/// Execute `consume`, returning once `max` messages were printed or
/// `shutdown` is cancelled
pub async fn execute_consume(
    bridge: &Bridge,
    queue: &str,
    max: Option<usize>,
    ack: bool,
    format: OutputFormat,
    shutdown: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let adapter = bridge.adapter(queue)?;
    let adapter_ref = &adapter;

    let delivered = adapter
        .subscribe(shutdown, max, |envelope| {
            if let Err(e) = write_envelope(&envelope, &format, out) {
                warn!(error = %e, "Failed to print message");
            }
            async move {
                if ack {
                    if let Err(e) = adapter_ref.acknowledge(&envelope).await {
                        warn!(error = %e, "Failed to acknowledge message");
                    }
                }
            }
        })
        .await?;

    info!(queue = %queue, delivered, "Consume finished");
    Ok(())
}

fn write_envelope(
    envelope: &Envelope,
    format: &OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    let body = String::from_utf8_lossy(&envelope.body);
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "body": body,
                "properties": envelope.properties,
            });
            writeln!(out, "{}", json)
        }
        OutputFormat::Text => {
            writeln!(out, "--- {}", envelope.topic_name().unwrap_or_default())?;
            for (key, value) in &envelope.properties {
                writeln!(out, "{}: {}", key, value)?;
            }
            writeln!(out, "{}", body)
        }
    }
}

/// Execute `encrypt-secret`
pub fn execute_encrypt_secret(
    bridge: &Bridge,
    plaintext: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let cipher = bridge
        .cipher
        .as_ref()
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "encryption.key".to_string(),
        })?;

    let encrypted = cipher.encrypt(plaintext)?;
    writeln!(out, "{}", encrypted)?;
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
