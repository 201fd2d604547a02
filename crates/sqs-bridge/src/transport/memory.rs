//! In-memory SQS transport for testing and development.
//!
//! Mirrors the parts of SQS behaviour the adapter relies on:
//! - Queues addressed by URL after a `GetQueueUrl` lookup
//! - Long-poll receives that wake as soon as a message arrives
//! - Visibility timeouts, with zero making a message available again
//! - Receipt handles that are only valid while a message is in flight
//!
//! Queues are created on first lookup.

use super::{SqsTransport, MAX_WAIT_TIME};
use crate::error::QueueError;
use crate::message::SqsMessage;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// URL scheme used for in-memory queues
const URL_SCHEME: &str = "memory://";

/// Visibility timeout applied to received messages
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
}

impl QueueStorage {
    fn queue_mut(&mut self, queue_url: &str) -> Result<&mut InMemoryQueue, QueueError> {
        queue_url
            .strip_prefix(URL_SCHEME)
            .and_then(|name| self.queues.get_mut(name))
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_url.to_string(),
            })
    }
}

#[derive(Default)]
struct InMemoryQueue {
    /// Messages available for delivery, oldest first
    messages: VecDeque<StoredMessage>,
    /// Delivered messages keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    /// Return in-flight messages whose visibility timeout has elapsed
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(entry) = self.in_flight.remove(&handle) {
                self.messages.push_front(entry.message);
            }
        }
    }

    /// Earliest instant at which an in-flight message becomes visible again
    fn next_release(&self) -> Option<Instant> {
        self.in_flight.values().map(|entry| entry.visible_at).min()
    }
}

#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    properties: crate::message::Properties,
    message_group_id: Option<String>,
    message_deduplication_id: Option<String>,
    receive_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

/// Outcome of a single non-blocking receive attempt
enum Delivery {
    Message(SqsMessage),
    /// Nothing available; carries when an in-flight message is next released
    Empty(Option<Instant>),
}

// ============================================================================
// Transport
// ============================================================================

/// In-memory implementation of [`SqsTransport`]
#[derive(Clone)]
pub struct InMemorySqsTransport {
    storage: Arc<Mutex<QueueStorage>>,
    arrivals: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemorySqsTransport {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Create a transport applying `visibility_timeout` to every delivery
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            storage: Arc::new(Mutex::new(QueueStorage::default())),
            arrivals: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    /// Number of messages waiting for delivery
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.lock()
            .queues
            .get(queue_name)
            .map_or(0, |queue| queue.messages.len())
    }

    /// Number of delivered messages not yet deleted or released
    pub fn in_flight_count(&self, queue_name: &str) -> usize {
        self.lock()
            .queues
            .get(queue_name)
            .map_or(0, |queue| queue.in_flight.len())
    }

    /// Names of all queues created so far
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, QueueStorage> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the next available message, moving it in flight
    fn try_receive(&self, queue_url: &str) -> Result<Delivery, QueueError> {
        let now = Instant::now();
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue_url)?;
        queue.release_expired(now);

        let Some(mut stored) = queue.messages.pop_front() else {
            return Ok(Delivery::Empty(queue.next_release()));
        };

        stored.receive_count += 1;
        let receipt_handle = Uuid::new_v4().to_string();

        let mut message = SqsMessage::new(stored.body.clone(), stored.properties.clone())
            .with_receipt_handle(receipt_handle.clone());
        message.message_id = Some(stored.message_id.clone());
        message.message_group_id = stored.message_group_id.clone();
        message.message_deduplication_id = stored.message_deduplication_id.clone();
        message.attributes.insert(
            "ApproximateReceiveCount".to_string(),
            stored.receive_count.to_string(),
        );
        if let Some(group_id) = &stored.message_group_id {
            message
                .attributes
                .insert("MessageGroupId".to_string(), group_id.clone());
        }

        queue.in_flight.insert(
            receipt_handle,
            InFlightMessage {
                message: stored,
                visible_at: now + self.visibility_timeout,
            },
        );

        Ok(Delivery::Message(message))
    }
}

impl Default for InMemorySqsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemorySqsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySqsTransport")
            .field("queues", &self.queue_names())
            .finish()
    }
}

#[async_trait]
impl SqsTransport for InMemorySqsTransport {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        self.lock()
            .queues
            .entry(queue_name.to_string())
            .or_default();
        Ok(format!("{}{}", URL_SCHEME, queue_name))
    }

    async fn send_message(
        &self,
        queue_url: &str,
        message: &SqsMessage,
    ) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        {
            let mut storage = self.lock();
            let queue = storage.queue_mut(queue_url)?;
            queue.messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: message.body.clone(),
                properties: message.properties.clone(),
                message_group_id: message.message_group_id.clone(),
                message_deduplication_id: message.message_deduplication_id.clone(),
                receive_count: 0,
            });
        }
        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
    ) -> Result<Option<SqsMessage>, QueueError> {
        let deadline = Instant::now() + wait.min(MAX_WAIT_TIME);

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = match self.try_receive(queue_url)? {
                Delivery::Message(message) => return Ok(Some(message)),
                Delivery::Empty(next_release) => next_release.map_or(deadline, |at| at.min(deadline)),
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Woken either by a send or by the next visibility expiry
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue_url)?;
        queue
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt_handle.to_string(),
            })
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: u32,
    ) -> Result<(), QueueError> {
        {
            let mut storage = self.lock();
            let queue = storage.queue_mut(queue_url)?;

            if visibility_timeout_secs == 0 {
                let entry = queue.in_flight.remove(receipt_handle).ok_or_else(|| {
                    QueueError::MessageNotFound {
                        receipt: receipt_handle.to_string(),
                    }
                })?;
                queue.messages.push_front(entry.message);
            } else {
                let entry = queue.in_flight.get_mut(receipt_handle).ok_or_else(|| {
                    QueueError::MessageNotFound {
                        receipt: receipt_handle.to_string(),
                    }
                })?;
                entry.visible_at =
                    Instant::now() + Duration::from_secs(u64::from(visibility_timeout_secs));
                return Ok(());
            }
        }
        self.arrivals.notify_waiters();
        Ok(())
    }
}
