//! Logical to physical queue name remapping.
//!
//! Operators can point a queue declared in topology (the logical name) at a
//! differently named SQS queue without touching the declaration. The table is
//! stored in administrative configuration as a JSON list:
//!
//! ```json
//! [
//!     { "logical": "orders.created", "physical": "orders-created-v2" },
//!     { "logical": "inventory.sync", "physical": "" }
//! ]
//! ```
//!
//! or as an object keyed by logical name, as written by the admin grid and the
//! install step that seeds newly declared queues with `""`:
//!
//! ```json
//! {
//!     "orders.created": { "xml_name": "orders.created", "sqs_name": "orders-created-v2" },
//!     "inventory.sync": ""
//! }
//! ```
//!
//! An empty physical name means no remap has been configured yet. It is still
//! a match and resolves to an empty queue name, which the queue name formatter
//! later rejects.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One row of the mapping table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMappingEntry {
    pub logical: String,
    #[serde(default)]
    pub physical: String,
}

impl NameMappingEntry {
    pub fn new(logical: impl Into<String>, physical: impl Into<String>) -> Self {
        Self {
            logical: logical.into(),
            physical: physical.into(),
        }
    }
}

/// Stored shapes of the mapping table
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTable {
    List(Vec<NameMappingEntry>),
    Keyed(BTreeMap<String, KeyedRow>),
}

/// Value of a keyed table row
#[derive(Deserialize)]
#[serde(untagged)]
enum KeyedRow {
    Row {
        #[serde(default)]
        sqs_name: String,
    },
    Seed(String),
}

impl From<StoredTable> for Vec<NameMappingEntry> {
    fn from(table: StoredTable) -> Self {
        match table {
            StoredTable::List(entries) => entries,
            StoredTable::Keyed(rows) => rows
                .into_iter()
                .map(|(logical, row)| {
                    let physical = match row {
                        KeyedRow::Row { sqs_name } => sqs_name,
                        KeyedRow::Seed(physical) => physical,
                    };
                    NameMappingEntry::new(logical, physical)
                })
                .collect(),
        }
    }
}

/// Mapping table keyed by logical queue name.
///
/// Entries keep their stored order; logical names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NamesMapping {
    entries: Vec<NameMappingEntry>,
}

impl NamesMapping {
    /// Build a table from entries, rejecting duplicate logical names
    pub fn new(entries: Vec<NameMappingEntry>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.logical.as_str()) {
                return Err(ConfigurationError::DuplicateMapping {
                    logical_name: entry.logical.clone(),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Parse the serialized form stored in administrative configuration.
    ///
    /// Both the list and the keyed object form are accepted. A blank value is
    /// an empty table.
    pub fn from_json(key: &str, serialized: &str) -> Result<Self, ConfigurationError> {
        if serialized.trim().is_empty() {
            return Ok(Self::default());
        }

        let table: StoredTable =
            serde_json::from_str(serialized).map_err(|e| ConfigurationError::Parsing {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Self::new(table.into())
    }

    /// Resolve the physical queue name for a logical one.
    ///
    /// The first entry whose logical name equals `logical_name` wins. Names
    /// without an entry are returned unchanged.
    pub fn remap<'a>(&'a self, logical_name: &'a str) -> &'a str {
        self.get(logical_name).unwrap_or(logical_name)
    }

    /// Physical name configured for a logical name, if any
    pub fn get(&self, logical_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.logical == logical_name)
            .map(|entry| entry.physical.as_str())
    }

    pub fn entries(&self) -> &[NameMappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "names_mapping_tests.rs"]
mod tests;
