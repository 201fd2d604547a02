//! Tests for message types.

use super::*;

#[test]
fn test_queue_handle_detects_fifo_suffix() {
    assert!(QueueHandle::new("shop_orders.fifo").is_fifo());
    assert!(!QueueHandle::new("shop_orders").is_fifo());
    assert!(!QueueHandle::new("shop_fifo").is_fifo());
    assert!(!QueueHandle::new("orders.fifo.dlq").is_fifo());
}

#[test]
fn test_envelope_property_accessors() {
    let envelope = Envelope::new("{}")
        .with_property(RECEIPT_HANDLE_PROPERTY, "h1")
        .with_property(TOPIC_NAME_PROPERTY, "orders.created");

    assert_eq!(envelope.receipt_handle(), Some("h1"));
    assert_eq!(envelope.topic_name(), Some("orders.created"));
    assert_eq!(envelope.property("missing"), None);
}

#[test]
fn test_envelope_properties_are_ordered() {
    let envelope = Envelope::new("")
        .with_property("zeta", "1")
        .with_property("alpha", "2");

    let keys: Vec<&str> = envelope.properties.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["alpha", "zeta"]);
}

#[test]
fn test_receive_count_parsing() {
    let mut message = SqsMessage::new("body", Properties::new());
    assert_eq!(message.receive_count(), None);

    message
        .attributes
        .insert("ApproximateReceiveCount".to_string(), "3".to_string());
    assert_eq!(message.receive_count(), Some(3));
}
