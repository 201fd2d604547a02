//! Connection lifecycle: one cached SQS client context per configuration.
//!
//! [`ConnectionProvider`] lazily builds an [`SqsContext`] from the resolved
//! configuration and hands out the same instance for the rest of its
//! lifetime. The context produces queue handles, consumers and producers.

use crate::config::{ConfigKey, ConfigResolver, ResolvedConfig};
use crate::error::{ConfigurationError, QueueError, ValidationError};
use crate::message::{Properties, QueueHandle, SqsMessage};
use crate::transport::{HttpSqsSettings, HttpSqsTransport, SqsTransport, MAX_MESSAGE_SIZE};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

// ============================================================================
// Connection Factories
// ============================================================================

/// Builds the transport a connection talks through
pub trait ConnectionFactory: Send + Sync {
    fn create_transport(
        &self,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn SqsTransport>, QueueError>;
}

/// Connects to SQS over HTTP using the resolved region, credentials and endpoint
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnectionFactory;

impl ConnectionFactory for HttpConnectionFactory {
    fn create_transport(
        &self,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn SqsTransport>, QueueError> {
        let region = config
            .get(ConfigKey::Region)
            .ok_or_else(|| ConfigurationError::Missing {
                key: ConfigKey::Region.to_string(),
            })?;

        let settings = HttpSqsSettings {
            region: region.to_string(),
            endpoint: config.get(ConfigKey::Endpoint).map(str::to_string),
            access_key: config.get(ConfigKey::AccessKey).map(str::to_string),
            secret_key: config.secret_key().cloned(),
            api_version: config.get(ConfigKey::Version).map(str::to_string),
        };

        let transport = HttpSqsTransport::new(settings)?;
        Ok(Arc::new(transport))
    }
}

/// Hands out a pre-built transport, e.g. [`crate::transport::InMemorySqsTransport`]
#[derive(Clone)]
pub struct FixedTransportFactory {
    transport: Arc<dyn SqsTransport>,
}

impl FixedTransportFactory {
    pub fn new(transport: Arc<dyn SqsTransport>) -> Self {
        Self { transport }
    }
}

impl ConnectionFactory for FixedTransportFactory {
    fn create_transport(
        &self,
        _config: &ResolvedConfig,
    ) -> Result<Arc<dyn SqsTransport>, QueueError> {
        Ok(self.transport.clone())
    }
}

// ============================================================================
// Connection Provider
// ============================================================================

/// Owns the single connection built from a [`ConfigResolver`]
pub struct ConnectionProvider {
    config: Arc<ConfigResolver>,
    factory: Arc<dyn ConnectionFactory>,
    connection: OnceLock<Arc<SqsContext>>,
}

impl ConnectionProvider {
    pub fn new(config: Arc<ConfigResolver>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            config,
            factory,
            connection: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Arc<ConfigResolver> {
        &self.config
    }

    /// Get the connection, building it on first use.
    ///
    /// Every successful call returns the same `Arc`. Failures are not cached.
    pub fn get_connection(&self) -> Result<Arc<SqsContext>, QueueError> {
        if let Some(connection) = self.connection.get() {
            return Ok(connection.clone());
        }

        let resolved = self.config.resolved()?;
        let transport = self.factory.create_transport(resolved)?;
        let connection = self
            .connection
            .get_or_init(|| Arc::new(SqsContext::new(transport)));

        info!(source = ?resolved.source(), "SQS connection established");
        Ok(connection.clone())
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("connected", &self.connection.get().is_some())
            .finish()
    }
}

// ============================================================================
// Client Context
// ============================================================================

/// Client context for one SQS endpoint
pub struct SqsContext {
    transport: Arc<dyn SqsTransport>,
    /// Queue URL cache (queue name -> URL)
    queue_urls: RwLock<HashMap<String, String>>,
}

impl SqsContext {
    pub fn new(transport: Arc<dyn SqsTransport>) -> Self {
        Self {
            transport,
            queue_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Create a handle for a fully formatted physical queue name
    pub fn create_queue(&self, name: &str) -> QueueHandle {
        QueueHandle::new(name)
    }

    pub fn create_consumer(self: &Arc<Self>, queue: QueueHandle) -> SqsConsumer {
        SqsConsumer {
            context: self.clone(),
            queue,
        }
    }

    pub fn create_producer(self: &Arc<Self>) -> SqsProducer {
        SqsProducer {
            context: self.clone(),
        }
    }

    pub fn create_message(&self, body: impl Into<String>, properties: Properties) -> SqsMessage {
        SqsMessage::new(body, properties)
    }

    pub fn transport(&self) -> &Arc<dyn SqsTransport> {
        &self.transport
    }

    /// Resolve a queue URL, caching the result
    pub async fn queue_url(&self, queue: &QueueHandle) -> Result<String, QueueError> {
        {
            let cache = self.queue_urls.read().await;
            if let Some(url) = cache.get(queue.name()) {
                return Ok(url.clone());
            }
        }

        let url = self.transport.get_queue_url(queue.name()).await?;
        debug!(queue = %queue, url = %url, "Resolved queue URL");

        let mut cache = self.queue_urls.write().await;
        cache.insert(queue.name().to_string(), url.clone());
        Ok(url)
    }
}

impl std::fmt::Debug for SqsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsContext").finish_non_exhaustive()
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Receives and settles messages from one queue
#[derive(Debug, Clone)]
pub struct SqsConsumer {
    context: Arc<SqsContext>,
    queue: QueueHandle,
}

impl SqsConsumer {
    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    /// Wait up to `timeout` for one message
    pub async fn receive(&self, timeout: Duration) -> Result<Option<SqsMessage>, QueueError> {
        let url = self.context.queue_url(&self.queue).await?;
        self.context.transport.receive_message(&url, timeout).await
    }

    /// Delete a delivered message
    pub async fn acknowledge(&self, message: &SqsMessage) -> Result<(), QueueError> {
        let receipt_handle = Self::receipt_handle(message)?;
        let url = self.context.queue_url(&self.queue).await?;
        self.context
            .transport
            .delete_message(&url, receipt_handle)
            .await
    }

    /// Give a delivered message back.
    ///
    /// With `requeue` the message becomes visible again immediately; otherwise
    /// it is deleted and the queue's own redrive policy no longer applies.
    pub async fn reject(&self, message: &SqsMessage, requeue: bool) -> Result<(), QueueError> {
        let receipt_handle = Self::receipt_handle(message)?;
        let url = self.context.queue_url(&self.queue).await?;
        if requeue {
            self.context
                .transport
                .change_message_visibility(&url, receipt_handle, 0)
                .await
        } else {
            self.context
                .transport
                .delete_message(&url, receipt_handle)
                .await
        }
    }

    fn receipt_handle(message: &SqsMessage) -> Result<&str, QueueError> {
        message
            .receipt_handle
            .as_deref()
            .filter(|handle| !handle.is_empty())
            .ok_or_else(|| {
                ValidationError::Required {
                    field: "receipt_handle".to_string(),
                }
                .into()
            })
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Submits messages to any queue of the connection
#[derive(Debug, Clone)]
pub struct SqsProducer {
    context: Arc<SqsContext>,
}

impl SqsProducer {
    /// Send a message, returning the service assigned message id.
    ///
    /// FIFO queues get a fresh deduplication id when none is set. Standard
    /// queues never carry FIFO fields.
    pub async fn send(
        &self,
        queue: &QueueHandle,
        mut message: SqsMessage,
    ) -> Result<String, QueueError> {
        let size = message.body.len();
        if size > MAX_MESSAGE_SIZE {
            return Err(QueueError::MessageTooLarge {
                size,
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        if queue.is_fifo() {
            if message.message_deduplication_id.is_none() {
                message.message_deduplication_id = Some(Uuid::new_v4().to_string());
            }
        } else {
            message.message_group_id = None;
            message.message_deduplication_id = None;
        }

        let url = self.context.queue_url(queue).await?;
        let message_id = self.context.transport.send_message(&url, &message).await?;
        debug!(queue = %queue, message_id = %message_id, "Message sent");
        Ok(message_id)
    }
}
