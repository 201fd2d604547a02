//! Tests for envelope encoding and decoding.

use super::*;
use crate::message::Properties;
use crate::transport::InMemorySqsTransport;
use std::sync::Arc;

fn codec() -> EnvelopeCodec {
    EnvelopeCodec::new("shop.orders", Some("g1".to_string()))
}

fn context() -> SqsContext {
    SqsContext::new(Arc::new(InMemorySqsTransport::new()))
}

mod encode_tests {
    use super::*;

    /// Verify body and properties pass through unchanged
    #[test]
    fn test_encode_copies_body_and_properties() {
        let envelope = Envelope::new(r#"{"id":7}"#).with_property("tenant", "acme");

        let message = codec()
            .encode(&envelope, &QueueHandle::new("shop_orders"), &context())
            .unwrap();

        assert_eq!(message.body, r#"{"id":7}"#);
        assert_eq!(message.properties, envelope.properties);
        assert_eq!(message.receipt_handle, None);
    }

    /// Verify a receiptHandle property addresses the native message
    #[test]
    fn test_encode_attaches_receipt_handle() {
        let envelope = Envelope::new("hello").with_property(RECEIPT_HANDLE_PROPERTY, "h1");

        let message = codec()
            .encode(&envelope, &QueueHandle::new("shop_orders"), &context())
            .unwrap();

        assert_eq!(message.receipt_handle.as_deref(), Some("h1"));
    }

    /// Verify FIFO queues get the configured group id
    #[test]
    fn test_encode_fifo_sets_group_id() {
        let message = codec()
            .encode(&Envelope::new("x"), &QueueHandle::new("shop_orders.fifo"), &context())
            .unwrap();

        assert_eq!(message.message_group_id.as_deref(), Some("g1"));
    }

    /// Verify standard queues never get a group id
    #[test]
    fn test_encode_standard_queue_has_no_group_id() {
        let message = codec()
            .encode(&Envelope::new("x"), &QueueHandle::new("shop_orders"), &context())
            .unwrap();

        assert_eq!(message.message_group_id, None);
    }

    /// Verify FIFO queues without a configured group id send none
    #[test]
    fn test_encode_fifo_without_group_id() {
        let codec = EnvelopeCodec::new("shop.orders", None);

        let message = codec
            .encode(&Envelope::new("x"), &QueueHandle::new("shop_orders.fifo"), &context())
            .unwrap();

        assert_eq!(message.message_group_id, None);
    }

    /// Verify non UTF-8 bodies are refused
    #[test]
    fn test_encode_rejects_invalid_utf8() {
        let envelope = Envelope::new(vec![0xff, 0xfe]);

        let result = codec().encode(&envelope, &QueueHandle::new("shop_orders"), &context());

        assert!(matches!(
            result,
            Err(QueueError::SerializationError(SerializationError::InvalidUtf8))
        ));
    }
}

mod decode_tests {
    use super::*;

    /// Verify an encoded envelope decodes with the same receipt handle and message id
    #[test]
    fn test_receipt_handle_round_trip() {
        let envelope = Envelope::new("hello").with_property(RECEIPT_HANDLE_PROPERTY, "h1");
        let message = codec()
            .encode(&envelope, &QueueHandle::new("shop_orders"), &context())
            .unwrap();

        let decoded = codec().decode(message);

        assert_eq!(decoded.receipt_handle(), Some("h1"));
        assert_eq!(decoded.property(MESSAGE_ID_PROPERTY), Some("h1"));
        assert_eq!(decoded.body, Bytes::from("hello"));
    }

    /// Verify a topic_name in the body overrides the logical queue name
    #[test]
    fn test_topic_from_body() {
        let message = SqsMessage::new(
            r#"{"topic_name": "orders.created", "id": 7}"#,
            Properties::new(),
        )
        .with_receipt_handle("h2");

        let decoded = codec().decode(message);

        assert_eq!(decoded.topic_name(), Some("orders.created"));
    }

    /// Verify the logical queue name is the topic when the body names none
    #[test]
    fn test_topic_falls_back_to_logical_name() {
        for body in [r#"{"id": 7}"#, "plain text", r#"{"topic_name": 5}"#, "[1,2]"] {
            let message = SqsMessage::new(body, Properties::new()).with_receipt_handle("h3");

            let decoded = codec().decode(message);

            assert_eq!(decoded.topic_name(), Some("shop.orders"), "body: {}", body);
        }
    }

    /// Verify derived properties take precedence over native ones
    #[test]
    fn test_derived_properties_take_precedence() {
        let mut properties = Properties::new();
        properties.insert(TOPIC_NAME_PROPERTY.to_string(), "stale".to_string());
        properties.insert(RECEIPT_HANDLE_PROPERTY.to_string(), "old".to_string());
        properties.insert(MESSAGE_ID_PROPERTY.to_string(), "old".to_string());
        properties.insert("tenant".to_string(), "acme".to_string());
        let message = SqsMessage::new("{}", properties).with_receipt_handle("h4");

        let decoded = codec().decode(message);

        assert_eq!(decoded.topic_name(), Some("shop.orders"));
        assert_eq!(decoded.receipt_handle(), Some("h4"));
        assert_eq!(decoded.property(MESSAGE_ID_PROPERTY), Some("h4"));
        assert_eq!(decoded.property("tenant"), Some("acme"));
    }
}
