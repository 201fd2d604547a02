//! # Queue Adapter
//!
//! Runtime surface the host application talks to. A [`QueueAdapter`] is bound
//! to one logical queue; the physical name is resolved through the mapping
//! table when the adapter is created and stays fixed afterwards.
//!
//! Delivery is at-least-once. [`QueueAdapter::subscribe`] only delivers; the
//! callback is responsible for acknowledging, and anything left unacknowledged
//! is redelivered once the queue's visibility timeout expires.
//!
//! An adapter owns one cached consumer. Give each worker its own adapter
//! instead of sharing one between tasks.

use crate::codec::EnvelopeCodec;
use crate::config::{ConfigKey, ConfigResolver};
use crate::connection::{ConnectionProvider, SqsConsumer, SqsContext};
use crate::error::{ConfigurationError, QueueError, ValidationError};
use crate::message::{Envelope, QueueHandle, FIFO_SUFFIX};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// How long a single dequeue waits for a message
pub const POLL_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Longest queue name SQS accepts, including the `.fifo` suffix
pub const MAX_QUEUE_NAME_LENGTH: usize = 80;

// ============================================================================
// Queue Name Formatting
// ============================================================================

/// Turns a remapped queue name into the name used against the service
pub trait QueueNameFormatter: Send + Sync {
    fn format(&self, queue_name: &str) -> Result<String, ValidationError>;
}

/// Formats names as `{prefix}_{name}` with dots replaced by underscores.
///
/// A trailing `.fifo` is kept as is so FIFO queues stay recognisable. The
/// result must be 1-80 characters of ASCII alphanumerics, hyphens and
/// underscores (plus the suffix).
#[derive(Debug, Clone, Default)]
pub struct PrefixedQueueNameFormatter {
    prefix: Option<String>,
}

impl PrefixedQueueNameFormatter {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    /// Use the `prefix` setting of the resolved configuration
    pub fn from_resolver(config: &ConfigResolver) -> Result<Self, ConfigurationError> {
        Ok(Self::new(config.get_value(ConfigKey::Prefix)?))
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

impl QueueNameFormatter for PrefixedQueueNameFormatter {
    fn format(&self, queue_name: &str) -> Result<String, ValidationError> {
        let (base, suffix) = match queue_name.strip_suffix(FIFO_SUFFIX) {
            Some(base) => (base, FIFO_SUFFIX),
            None => (queue_name, ""),
        };

        if base.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        let base = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, base),
            None => base.to_string(),
        }
        .replace('.', "_");

        if !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: format!(
                    "'{}' may only contain ASCII alphanumerics, hyphens and underscores",
                    queue_name
                ),
            });
        }

        let formatted = format!("{}{}", base, suffix);
        if formatted.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!(
                    "'{}' exceeds {} characters",
                    formatted, MAX_QUEUE_NAME_LENGTH
                ),
            });
        }

        Ok(formatted)
    }
}

// ============================================================================
// Message Queue Interface
// ============================================================================

/// Generic message queue operations offered to the host application
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Wait up to [`POLL_TIMEOUT`] for one message. `None` when the wait elapsed.
    async fn dequeue(&self) -> Result<Option<Envelope>, QueueError>;

    /// Settle a delivery so it is not redelivered
    async fn acknowledge(&self, envelope: &Envelope) -> Result<(), QueueError>;

    /// Give a delivery back. `reason` is logged but not sent to the service.
    async fn reject(
        &self,
        envelope: &Envelope,
        requeue: bool,
        reason: Option<&str>,
    ) -> Result<(), QueueError>;

    /// Publish a message
    async fn push(&self, envelope: &Envelope) -> Result<(), QueueError>;
}

// ============================================================================
// Queue Adapter
// ============================================================================

/// SQS backed [`MessageQueue`] for one logical queue
pub struct QueueAdapter {
    /// Remapped, not yet formatted
    queue_name: String,
    connections: Arc<ConnectionProvider>,
    formatter: Arc<dyn QueueNameFormatter>,
    codec: EnvelopeCodec,
    consumer: OnceLock<SqsConsumer>,
}

impl QueueAdapter {
    /// Create an adapter for `logical_name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration cannot be resolved.
    pub fn new(
        logical_name: impl Into<String>,
        connections: Arc<ConnectionProvider>,
        formatter: Arc<dyn QueueNameFormatter>,
    ) -> Result<Self, QueueError> {
        let logical_name = logical_name.into();
        let config = connections.config();

        let queue_name = config.names_mapping()?.remap(&logical_name).to_string();
        let message_group_id = config.get_value(ConfigKey::MessageGroupId)?;

        debug!(
            logical = %logical_name,
            physical = %queue_name,
            "Created queue adapter"
        );

        Ok(Self {
            queue_name,
            connections,
            formatter,
            codec: EnvelopeCodec::new(logical_name, message_group_id),
            consumer: OnceLock::new(),
        })
    }

    pub fn logical_name(&self) -> &str {
        self.codec.logical_name()
    }

    /// Queue name after remapping, before formatting
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Physical queue the adapter talks to, created through the connection
    pub fn queue_handle(&self) -> Result<QueueHandle, QueueError> {
        let connection = self.connections.get_connection()?;
        self.create_queue(&connection)
    }

    fn create_queue(&self, connection: &SqsContext) -> Result<QueueHandle, QueueError> {
        let formatted = self.formatter.format(&self.queue_name)?;
        Ok(connection.create_queue(&formatted))
    }

    fn consumer(&self) -> Result<&SqsConsumer, QueueError> {
        if let Some(consumer) = self.consumer.get() {
            return Ok(consumer);
        }

        let connection = self.connections.get_connection()?;
        let consumer = connection.create_consumer(self.create_queue(&connection)?);
        Ok(self.consumer.get_or_init(|| consumer))
    }

    /// Deliver messages to `callback` until `max_messages` have been delivered
    /// or `shutdown` is cancelled.
    ///
    /// Without a limit the loop only ends on cancellation or error. Messages
    /// are not acknowledged here. Returns the number of messages delivered.
    ///
    /// Cancelling abandons a receive that is still waiting. If the service had
    /// already handed a message to that receive, the message stays invisible
    /// and is redelivered only once its visibility timeout expires.
    #[instrument(skip(self, shutdown, callback), fields(queue = %self.queue_name))]
    pub async fn subscribe<F, Fut>(
        &self,
        shutdown: &CancellationToken,
        max_messages: Option<usize>,
        mut callback: F,
    ) -> Result<usize, QueueError>
    where
        F: FnMut(Envelope) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut delivered = 0usize;

        loop {
            if max_messages.is_some_and(|max| delivered >= max) {
                break;
            }

            let envelope = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Subscription cancelled");
                    break;
                }
                result = self.dequeue() => result?,
            };

            if let Some(envelope) = envelope {
                callback(envelope).await;
                delivered += 1;
            }
        }

        info!(delivered, "Subscription finished");
        Ok(delivered)
    }
}

impl std::fmt::Debug for QueueAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapter")
            .field("logical_name", &self.logical_name())
            .field("queue_name", &self.queue_name)
            .finish()
    }
}

#[async_trait]
impl MessageQueue for QueueAdapter {
    async fn dequeue(&self) -> Result<Option<Envelope>, QueueError> {
        let message = self.consumer()?.receive(POLL_TIMEOUT).await?;
        Ok(message.map(|message| self.codec.decode(message)))
    }

    async fn acknowledge(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let consumer = self.consumer()?;
        let connection = self.connections.get_connection()?;
        let message = self.codec.encode(envelope, consumer.queue(), &connection)?;
        consumer.acknowledge(&message).await
    }

    async fn reject(
        &self,
        envelope: &Envelope,
        requeue: bool,
        reason: Option<&str>,
    ) -> Result<(), QueueError> {
        if let Some(reason) = reason {
            debug!(queue = %self.queue_name, requeue, reason, "Rejecting message");
        }

        let consumer = self.consumer()?;
        let connection = self.connections.get_connection()?;
        let message = self.codec.encode(envelope, consumer.queue(), &connection)?;
        consumer.reject(&message, requeue).await
    }

    async fn push(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let connection = self.connections.get_connection()?;
        let queue = self.create_queue(&connection)?;
        let message = self.codec.encode(envelope, &queue, &connection)?;

        connection.create_producer().send(&queue, message).await?;
        Ok(())
    }
}
