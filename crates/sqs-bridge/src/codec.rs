//! Translation between application envelopes and SQS messages.

use crate::connection::SqsContext;
use crate::error::{QueueError, SerializationError};
use crate::message::{
    Envelope, QueueHandle, SqsMessage, MESSAGE_ID_PROPERTY, RECEIPT_HANDLE_PROPERTY,
    TOPIC_NAME_PROPERTY,
};
use bytes::Bytes;

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Encodes and decodes envelopes for one logical queue
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    logical_name: String,
    message_group_id: Option<String>,
}

impl EnvelopeCodec {
    /// `logical_name` is the topic reported for messages whose body names none;
    /// `message_group_id` is attached to messages sent to FIFO queues.
    pub fn new(logical_name: impl Into<String>, message_group_id: Option<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            message_group_id,
        }
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn message_group_id(&self) -> Option<&str> {
        self.message_group_id.as_deref()
    }

    /// Build the SQS message for an outbound envelope through `context`.
    ///
    /// Properties are copied verbatim. A `receiptHandle` property addresses an
    /// existing delivery for acknowledge and reject. Messages for FIFO queues
    /// get the configured group id; standard queues never do.
    pub fn encode(
        &self,
        envelope: &Envelope,
        queue: &QueueHandle,
        context: &SqsContext,
    ) -> Result<SqsMessage, QueueError> {
        let body = std::str::from_utf8(&envelope.body)
            .map_err(|_| SerializationError::InvalidUtf8)?;

        let mut message = context.create_message(body, envelope.properties.clone());
        message.receipt_handle = envelope.receipt_handle().map(str::to_string);

        if queue.is_fifo() {
            message.message_group_id = self.message_group_id.clone();
        }

        Ok(message)
    }

    /// Build the envelope for an inbound SQS message.
    ///
    /// `topic_name`, `receiptHandle` and `message_id` take precedence over
    /// properties of the same name carried by the message. `message_id` is the
    /// receipt handle.
    pub fn decode(&self, message: SqsMessage) -> Envelope {
        let topic_name =
            topic_from_body(&message.body).unwrap_or_else(|| self.logical_name.clone());
        let receipt_handle = message.receipt_handle.unwrap_or_default();

        let mut properties = message.properties;
        properties.insert(TOPIC_NAME_PROPERTY.to_string(), topic_name);
        properties.insert(MESSAGE_ID_PROPERTY.to_string(), receipt_handle.clone());
        properties.insert(RECEIPT_HANDLE_PROPERTY.to_string(), receipt_handle);

        Envelope {
            body: Bytes::from(message.body),
            properties,
        }
    }
}

/// `topic_name` string field of a JSON object body
fn topic_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get(TOPIC_NAME_PROPERTY)?
        .as_str()
        .map(str::to_string)
}
