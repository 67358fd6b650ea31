//! Parser for tables already extracted to rows of cells.
//!
//! PDF documents yield logical tables (header plus rows of strings) rather
//! than a DOM. This parser is a projection of the DOM table parser over
//! that shape: no spans and no includes, rows padded with empty cells to
//! the width of the column map, nesting still driven by `>` markers.

use std::collections::{BTreeMap, HashMap};

use snafu::ensure;
use tracing::debug;

use dcmspec_core::metadata::Metadata;
use dcmspec_core::node::{Node, Value};

use crate::table::{sanitize_name, BadMapSnafu, Error};

type Result<T> = std::result::Result<T, Error>;

/// A table extracted from a non-DOM source, one `Vec<String>` per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogicalTable {
    /// Identifier of the table, when the source assigns one.
    pub table_id: Option<String>,
    /// Header cells.
    pub header: Vec<String>,
    /// Data rows.
    pub rows: Vec<Vec<String>>,
}

/// Parser for pre-extracted tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvTableParser;

impl CsvTableParser {
    pub fn new() -> Self {
        CsvTableParser
    }

    /// Parses a logical table into a `(Metadata, content)` pair.
    pub fn parse(
        &self,
        table: &LogicalTable,
        column_to_attr: &BTreeMap<usize, String>,
        name_attr: &str,
        table_id: Option<&str>,
        include_depth: Option<u32>,
    ) -> Result<(Metadata, Node)> {
        let content = self.parse_table(&table.rows, column_to_attr, name_attr)?;
        let metadata = Metadata {
            header: table.header.clone(),
            column_to_attr: column_to_attr.clone(),
            table_id: table_id
                .map(str::to_string)
                .or_else(|| table.table_id.clone())
                .unwrap_or_default(),
            include_depth,
            name_attr: Some(name_attr.to_string()),
            ..Default::default()
        };
        Ok((metadata, content))
    }

    /// Builds the content tree from raw rows.
    ///
    /// Rows shorter than the column map are filled in with empty cells;
    /// newlines inside the name cell become spaces.
    pub fn parse_table(
        &self,
        rows: &[Vec<String>],
        column_to_attr: &BTreeMap<usize, String>,
        name_attr: &str,
    ) -> Result<Node> {
        ensure!(!column_to_attr.is_empty(), BadMapSnafu);

        let attrs: Vec<&String> = column_to_attr.values().collect();
        let mut root = Node::new("content");
        let mut level_paths: HashMap<usize, Vec<usize>> = HashMap::new();

        for row in rows {
            let mut row_data = indexmap::IndexMap::new();
            let mut name_text = String::new();
            for (position, attr) in attrs.iter().enumerate() {
                let cell = row.get(position).cloned().unwrap_or_default();
                let cell = if attr.as_str() == name_attr {
                    let cleaned = cell.replace('\n', " ");
                    name_text = cleaned.clone();
                    cleaned
                } else {
                    cell
                };
                row_data.insert((*attr).clone(), Value::Text(cell));
            }

            let row_level = name_text.matches('>').count();
            let parent_path = row_level
                .checked_sub(1)
                .and_then(|level| level_paths.get(&level).cloned())
                .unwrap_or_default();
            let parent = root
                .node_at_mut(&parent_path)
                .expect("level paths address existing nodes");
            let name = sanitize_name(&name_text);
            debug!(row_level, name = %name, "creating node");
            parent.children.push(Node::with_attrs(name, row_data));

            let mut path = parent_path;
            path.push(parent.children.len() - 1);
            level_paths.insert(row_level, path);
        }

        Ok(root)
    }
}
