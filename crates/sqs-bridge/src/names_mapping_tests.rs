//! Tests for queue name remapping.

use super::*;

fn sample_mapping() -> NamesMapping {
    NamesMapping::new(vec![
        NameMappingEntry::new("orders.created", "orders-created-v2"),
        NameMappingEntry::new("inventory.sync", ""),
        NameMappingEntry::new("billing", "billing.fifo"),
    ])
    .unwrap()
}

mod remap_tests {
    use super::*;

    /// Verify that mapped names resolve to their physical name.
    #[test]
    fn test_mapped_names_resolve_to_physical() {
        let mapping = sample_mapping();

        assert_eq!(mapping.remap("orders.created"), "orders-created-v2");
        assert_eq!(mapping.remap("billing"), "billing.fifo");
    }

    /// Verify that unmapped names pass through unchanged.
    #[test]
    fn test_unmapped_names_are_identity() {
        let mapping = sample_mapping();

        for name in ["payments", "orders", "orders.created.retry", ""] {
            assert_eq!(mapping.remap(name), name);
        }
    }

    /// Verify that an entry with an empty physical name still matches.
    #[test]
    fn test_empty_physical_name_is_a_match() {
        let mapping = sample_mapping();

        assert_eq!(mapping.remap("inventory.sync"), "");
        assert_eq!(mapping.get("inventory.sync"), Some(""));
    }

    /// Verify that matching is exact, not case-insensitive or prefix based.
    #[test]
    fn test_match_is_exact() {
        let mapping = sample_mapping();

        assert_eq!(mapping.remap("Orders.Created"), "Orders.Created");
        assert_eq!(mapping.remap("orders.create"), "orders.create");
    }

    #[test]
    fn test_empty_table_is_identity() {
        let mapping = NamesMapping::default();
        assert!(mapping.is_empty());
        assert_eq!(mapping.remap("orders.created"), "orders.created");
    }
}

mod parsing_tests {
    use super::*;

    #[test]
    fn test_parse_stored_table() {
        let json = r#"[
            {"logical": "orders.created", "physical": "orders-created-v2"},
            {"logical": "inventory.sync"}
        ]"#;

        let mapping = NamesMapping::from_json("system/sqs/names_mapping", json).unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.entries()[0].logical, "orders.created");
        assert_eq!(mapping.remap("inventory.sync"), "");
    }

    /// Verify that the keyed object form written by the admin grid is read.
    #[test]
    fn test_parse_keyed_table() {
        let json = r#"{
            "orders.created": {"xml_name": "orders.created", "sqs_name": "orders-v2"},
            "inventory.sync": ""
        }"#;

        let mapping = NamesMapping::from_json("system/sqs/names_mapping", json).unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.remap("orders.created"), "orders-v2");
        assert_eq!(mapping.get("inventory.sync"), Some(""));
        assert_eq!(mapping.remap("inventory.sync"), "");
        assert_eq!(mapping.remap("payments"), "payments");
    }

    /// Verify that a keyed row without a physical name is an empty mapping.
    #[test]
    fn test_keyed_row_without_physical_name() {
        let json = r#"{"orders.created": {"xml_name": "orders.created"}}"#;

        let mapping = NamesMapping::from_json("system/sqs/names_mapping", json).unwrap();

        assert_eq!(mapping.get("orders.created"), Some(""));
    }

    /// Verify that keyed rows of an unknown shape are rejected.
    #[test]
    fn test_keyed_row_of_wrong_type_is_rejected() {
        let result = NamesMapping::from_json("system/sqs/names_mapping", r#"{"orders": 7}"#);

        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }

    #[test]
    fn test_blank_value_is_empty_table() {
        let mapping = NamesMapping::from_json("system/sqs/names_mapping", "  ").unwrap();
        assert!(mapping.is_empty());
    }

    /// Verify that malformed stored data surfaces as a configuration error.
    #[test]
    fn test_malformed_table_is_rejected() {
        let result = NamesMapping::from_json("system/sqs/names_mapping", "{not json");

        match result {
            Err(ConfigurationError::Parsing { key, .. }) => {
                assert_eq!(key, "system/sqs/names_mapping")
            }
            other => panic!("expected parsing error, got {:?}", other),
        }
    }

    /// Verify that a logical name may only be mapped once.
    #[test]
    fn test_duplicate_logical_names_are_rejected() {
        let json = r#"[
            {"logical": "orders", "physical": "a"},
            {"logical": "orders", "physical": "b"}
        ]"#;

        let result = NamesMapping::from_json("system/sqs/names_mapping", json);
        assert!(matches!(
            result,
            Err(ConfigurationError::DuplicateMapping { ref logical_name }) if logical_name == "orders"
        ));
    }

    #[test]
    fn test_serializes_as_list() {
        let json = serde_json::to_value(sample_mapping()).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["logical"], "orders.created");
    }
}
