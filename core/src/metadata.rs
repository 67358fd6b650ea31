//! Table and document metadata attached to a specification model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata of a parsed specification table.
///
/// The column map keys are integers in memory. The JSON store writes them as
/// strings (JSON object keys always are) and serde parses them back into
/// integers on load, so a reloaded model keeps integer keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// DICOM release string, best effort; empty when not found.
    #[serde(default)]
    pub version: String,
    /// Column header strings, in column order.
    #[serde(default)]
    pub header: Vec<String>,
    /// Mapping from column index to node attribute name.
    #[serde(default)]
    pub column_to_attr: BTreeMap<usize, String>,
    /// Identifier of the source table anchor.
    #[serde(default)]
    pub table_id: String,
    /// URL the source document was fetched from.
    #[serde(default)]
    pub url: String,
    /// Depth to which included tables were expanded; absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_depth: Option<u32>,
    /// Attribute used to derive node names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_attr: Option<String>,
}

impl Metadata {
    /// The attribute name mapped to the given column index.
    pub fn attr_for_column(&self, column: usize) -> Option<&str> {
        self.column_to_attr.get(&column).map(String::as_str)
    }

    /// The next free column index, one past the current maximum.
    pub fn next_column(&self) -> usize {
        self.column_to_attr
            .keys()
            .next_back()
            .map_or(0, |max| max + 1)
    }

    /// Whether an attribute name appears in the column map.
    pub fn has_attr(&self, attr: &str) -> bool {
        self.column_to_attr.values().any(|a| a == attr)
    }
}
