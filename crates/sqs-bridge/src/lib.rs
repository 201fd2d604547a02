//! # SQS Bridge
//!
//! Adapter that runs an application's generic message queue abstraction
//! (logical queues, publish, consume, acknowledge, reject) against Amazon SQS
//! or any service speaking the SQS query protocol.
//!
//! This library provides:
//! - Layered configuration resolution with secret decryption and caching
//! - Logical to physical queue name remapping
//! - One cached connection per configuration, with consumers and producers
//! - Envelope translation including topic inference and FIFO group ids
//! - A cancellable subscribe loop with at-least-once delivery
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration layers and the caching resolver
//! - [`names_mapping`] - Logical to physical queue name table
//! - [`connection`] - Connection provider, consumers and producers
//! - [`transport`] - SQS wire clients (HTTP and in-memory)
//! - [`codec`] - Envelope encoding and decoding
//! - [`queue`] - Queue adapter and name formatting
//! - [`secret`] - Encrypted secret handling
//! - [`error`] - Error types for all operations

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod names_mapping;
pub mod queue;
pub mod secret;
pub mod transport;

pub use codec::EnvelopeCodec;
pub use config::{
    AdminConfigSource, ConfigKey, ConfigResolver, ConfigSource, DeploymentConfigSource,
    ResolvedConfig, StaticAdminConfig, StaticDeploymentConfig,
};
pub use connection::{
    ConnectionFactory, ConnectionProvider, FixedTransportFactory, HttpConnectionFactory,
    SqsConsumer, SqsContext, SqsProducer,
};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{Envelope, Properties, QueueHandle, SqsMessage};
pub use names_mapping::{NameMappingEntry, NamesMapping};
pub use queue::{MessageQueue, PrefixedQueueNameFormatter, QueueAdapter, QueueNameFormatter};
pub use secret::{AesGcmSecretCipher, SecretDecryptor, SecretString};
pub use transport::{HttpSqsSettings, HttpSqsTransport, InMemorySqsTransport, SqsTransport};
