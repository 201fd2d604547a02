//! SQS wire protocol clients.
//!
//! [`SqsTransport`] is the seam between the adapter and the queue service. The
//! adapter only ever talks to SQS through it; everything above this module is
//! transport agnostic.

use crate::error::QueueError;
use crate::message::SqsMessage;
use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod memory;

pub use http::{HttpSqsSettings, HttpSqsTransport};
pub use memory::InMemorySqsTransport;

/// Longest long-poll wait SQS accepts for a single receive call
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Maximum message body size SQS accepts
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Operations consumed from the SQS service
#[async_trait]
pub trait SqsTransport: Send + Sync {
    /// Resolve the URL of a queue by name
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError>;

    /// Submit a message, returning the service assigned message id
    async fn send_message(&self, queue_url: &str, message: &SqsMessage)
        -> Result<String, QueueError>;

    /// Long-poll for a single message, waiting at most `wait`
    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
    ) -> Result<Option<SqsMessage>, QueueError>;

    /// Remove a delivered message from the queue
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str)
        -> Result<(), QueueError>;

    /// Change how long a delivered message stays invisible; zero redelivers it
    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: u32,
    ) -> Result<(), QueueError>;
}
