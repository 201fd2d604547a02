//! Message types exchanged with the host application and with SQS.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// Envelope property holding the topic the message was published to
pub const TOPIC_NAME_PROPERTY: &str = "topic_name";

/// Envelope property holding the SQS receipt handle of a delivery
pub const RECEIPT_HANDLE_PROPERTY: &str = "receiptHandle";

/// Envelope property holding the message identifier
pub const MESSAGE_ID_PROPERTY: &str = "message_id";

/// Suffix SQS requires on FIFO queue names
pub const FIFO_SUFFIX: &str = ".fifo";

/// Ordered key/value envelope properties
pub type Properties = BTreeMap<String, String>;

/// Generic message unit exchanged with the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub body: Bytes,
    pub properties: Properties,
}

impl Envelope {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            properties: Properties::new(),
        }
    }

    /// Add an envelope property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Receipt handle of the delivery this envelope came from
    pub fn receipt_handle(&self) -> Option<&str> {
        self.property(RECEIPT_HANDLE_PROPERTY)
    }

    pub fn topic_name(&self) -> Option<&str> {
        self.property(TOPIC_NAME_PROPERTY)
    }
}

/// A physical SQS queue: the fully formatted name plus its FIFO flag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    name: String,
    is_fifo: bool,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let is_fifo = name.ends_with(FIFO_SUFFIX);
        Self { name, is_fifo }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fifo(&self) -> bool {
        self.is_fifo
    }
}

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Message in SQS-native form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqsMessage {
    pub body: String,
    /// Application properties, carried as a single `Headers` message attribute
    pub properties: Properties,
    /// System attributes reported by SQS on receive (e.g. `ApproximateReceiveCount`)
    pub attributes: HashMap<String, String>,
    pub message_id: Option<String>,
    pub receipt_handle: Option<String>,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

impl SqsMessage {
    pub fn new(body: impl Into<String>, properties: Properties) -> Self {
        Self {
            body: body.into(),
            properties,
            ..Default::default()
        }
    }

    pub fn with_receipt_handle(mut self, receipt_handle: impl Into<String>) -> Self {
        self.receipt_handle = Some(receipt_handle.into());
        self
    }

    pub fn with_message_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.message_group_id = Some(group_id.into());
        self
    }

    /// Number of times SQS has delivered this message, when reported
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get("ApproximateReceiveCount")
            .and_then(|count| count.parse().ok())
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
