//! Parser for specification tables in XHTML DOM form.
//!
//! Turns one table of a DICOM document into a `(Metadata, content)` pair.
//! Row and column spans are propagated, nesting follows the `>` markers of
//! the name column, and `Include` rows are expanded recursively by parsing
//! the referenced table and splicing its rows in place, with a visited set
//! guarding against include cycles.

use std::collections::{BTreeMap, HashMap};

use snafu::{ensure, Snafu};
use sxd_document::dom::Document;
use sxd_document::dom::Element;
use tracing::{debug, info, warn};

use dcmspec_core::metadata::Metadata;
use dcmspec_core::node::{Node, Value};
use dcmspec_core::progress::{Progress, ProgressObserver, ProgressStatus};

use crate::dom;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// No anchor or no table was found for the requested table id.
    #[snafu(display("table with id '{table_id}' not found"))]
    TableNotFound { table_id: String },

    /// The column-to-attribute mapping is empty.
    #[snafu(display("column to node attribute mapping is missing"))]
    BadMap,
}

type Result<T> = std::result::Result<T, Error>;

/// Options controlling how a table is parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    /// Depth to which included tables are expanded; `None` is unlimited.
    pub include_depth: Option<u32>,
    /// Column map keys allowed to be missing when a row is short; rows
    /// with exactly that many cells fewer are aligned without them.
    pub skip_columns: &'a [usize],
    /// Column map keys whose cells keep their raw inner XML instead of
    /// extracted text. The name column is always extracted as text.
    pub unformatted_columns: &'a [usize],
}

/// Parser for DICOM specification tables in an XHTML DOM.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomTableParser;

impl DomTableParser {
    pub fn new() -> Self {
        DomTableParser
    }

    /// Parses the table and its metadata into a specification model pair.
    ///
    /// The returned metadata carries the document version, the table
    /// header, and the column map actually in effect: skipped columns are
    /// dropped and the keys rekeyed to a contiguous `0..k` range.
    pub fn parse(
        &self,
        doc: &Document<'_>,
        table_id: &str,
        column_to_attr: &BTreeMap<usize, String>,
        name_attr: &str,
        opts: &ParseOptions<'_>,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<(Metadata, Node)> {
        let mut run = ParseRun {
            column_to_attr,
            name_attr,
            opts,
            skipped_columns: false,
            visited: Vec::new(),
        };
        let content = run.parse_table(doc, table_id, 0, opts.include_depth, &mut progress)?;

        // Skipped columns disappear from the published map, rekeyed to
        // contiguous indices.
        let effective_map: BTreeMap<usize, String> = if run.skipped_columns {
            column_to_attr
                .iter()
                .filter(|(key, _)| !opts.skip_columns.contains(key))
                .enumerate()
                .map(|(index, (_, attr))| (index, attr.clone()))
                .collect()
        } else {
            column_to_attr.clone()
        };

        let mut metadata = self.parse_metadata(doc, table_id, &effective_map)?;
        metadata.table_id = table_id.to_string();
        metadata.include_depth = opts.include_depth;
        metadata.name_attr = Some(name_attr.to_string());
        Ok((metadata, content))
    }

    /// Extracts the document version and the table header.
    pub fn parse_metadata(
        &self,
        doc: &Document<'_>,
        table_id: &str,
        column_to_attr: &BTreeMap<usize, String>,
    ) -> Result<Metadata> {
        let table = dom::find_table(doc, table_id).ok_or_else(|| Error::TableNotFound {
            table_id: table_id.to_string(),
        })?;

        let mut metadata = Metadata {
            version: self.extract_version(doc),
            ..Default::default()
        };
        let (header, published_map) = extract_header(table, column_to_attr);
        info!(?header, "extracted header");
        metadata.header = header;
        metadata.column_to_attr = published_map;
        Ok(metadata)
    }

    /// Best-effort DICOM release string; empty with a warning if absent.
    fn extract_version(&self, doc: &Document<'_>) -> String {
        let version = version_from_book(doc).or_else(|| version_from_section(doc));
        match version {
            Some(version) => version,
            None => {
                warn!("DICOM Standard version not found");
                String::new()
            }
        }
    }
}

/// State of one `parse` invocation, shared across include recursion.
struct ParseRun<'a> {
    column_to_attr: &'a BTreeMap<usize, String>,
    name_attr: &'a str,
    opts: &'a ParseOptions<'a>,
    skipped_columns: bool,
    /// Table ids on the current include call stack.
    visited: Vec<String>,
}

/// Value of a pending row span, installed for every column the spanning
/// cell occupies.
#[derive(Debug, Clone)]
struct SpanTracker {
    cell: Cell,
    rows_left: usize,
    colspan: usize,
}

/// One logical cell of a row after span resolution.
#[derive(Debug, Clone)]
struct Cell {
    text: String,
    html: Option<String>,
    colspan: usize,
}

impl<'a> ParseRun<'a> {
    fn parse_table(
        &mut self,
        doc: &Document<'_>,
        table_id: &str,
        nesting_level: usize,
        include_depth: Option<u32>,
        progress: &mut Option<&mut dyn ProgressObserver>,
    ) -> Result<Node> {
        info!(nesting_level, table_id, "parsing table");
        ensure!(!self.column_to_attr.is_empty(), BadMapSnafu);

        let table = dom::find_table(doc, table_id).ok_or_else(|| Error::TableNotFound {
            table_id: table_id.to_string(),
        })?;

        self.visited.push(table_id.to_string());

        let rows: Vec<Element<'_>> = dom::subtree_elements(table)
            .into_iter()
            .filter(|e| dom::local_name(*e) == "tr")
            .collect();
        // The first row is the header.
        let data_rows = &rows[rows.len().min(1)..];
        let total_rows = data_rows.len();

        let mut root = Node::new("content");
        // Paths (child index chains) of the most recent node per nesting level.
        let mut level_paths: HashMap<usize, Vec<usize>> = HashMap::new();
        // Spans never cross table boundaries: fresh trackers per table.
        let mut trackers: Vec<Option<SpanTracker>> = Vec::new();

        for (row_index, row) in data_rows.iter().enumerate() {
            let mut row_data = self.extract_row_data(*row, &mut trackers);

            let Some(name_value) = row_data.get(self.name_attr).and_then(Value::as_str) else {
                continue;
            };
            let mut name_text = name_value.to_string();
            let row_level = nesting_level + name_text.matches('>').count();

            // Rows spliced from an included table inherit its nesting
            // markers, except titles.
            if nesting_level > 0 && !is_all_uppercase(&name_text) {
                name_text = format!("{}{}", ">".repeat(nesting_level), name_text);
                row_data.insert(self.name_attr.to_string(), Value::Text(name_text.clone()));
            }

            let expand_includes = include_depth.map_or(true, |depth| depth > 0);
            if name_text.contains("Include") && expand_includes {
                let next_depth = include_depth.map(|depth| depth - 1);
                match include_target(*row) {
                    Some(target) if self.visited.contains(&target) => {
                        warn!(
                            nesting_level,
                            table_id = %target,
                            "circular include reference, creating placeholder node"
                        );
                        create_node(&mut root, &mut level_paths, row_level, name_text, row_data);
                    }
                    Some(target) => {
                        debug!(nesting_level, table_id = %target, "expanding included table");
                        let included =
                            self.parse_table(doc, &target, row_level, next_depth, progress)?;
                        splice_included(&mut root, &level_paths, row_level, included);
                    }
                    None => {
                        warn!(nesting_level, "Include Table Id not found");
                        create_node(&mut root, &mut level_paths, row_level, name_text, row_data);
                    }
                }
            } else {
                create_node(&mut root, &mut level_paths, row_level, name_text, row_data);
            }

            if nesting_level == 0 && total_rows > 0 {
                if let Some(observer) = progress.as_mut() {
                    let percent = (((row_index + 1) * 100 / total_rows) as i32).min(100);
                    observer.update(&Progress::new(percent, ProgressStatus::ParsingTable));
                }
            }
        }

        info!(nesting_level, table_id, "table parsed successfully");
        self.visited.pop();
        Ok(root)
    }

    /// Extracts one row into an attribute bag aligned with the column map.
    fn extract_row_data(
        &mut self,
        row: Element<'_>,
        trackers: &mut Vec<Option<SpanTracker>>,
    ) -> indexmap::IndexMap<String, Value> {
        let mut cells: Vec<Cell> = Vec::new();
        let mut column = 0usize;

        // Cells owed to this row by spans from the rows above.
        for tracker in trackers.iter_mut().flatten() {
            if tracker.rows_left > 0 {
                cells.push(tracker.cell.clone());
                column += tracker.colspan;
                tracker.rows_left -= 1;
            }
        }

        // Actual cells, skipping columns covered by pending spans.
        let tds: Vec<Element<'_>> = dom::subtree_elements(row)
            .into_iter()
            .filter(|e| dom::local_name(*e) == "td")
            .collect();
        let mut td_iter = tds.into_iter();
        loop {
            if column >= trackers.len() {
                trackers.push(None);
            }
            if trackers[column]
                .as_ref()
                .is_some_and(|tracker| tracker.rows_left > 0)
            {
                column += trackers[column].as_ref().map_or(1, |t| t.colspan);
                continue;
            }
            let Some(td) = td_iter.next() else {
                break;
            };

            let cell = self.extract_cell(td);
            let rowspan = span_attribute(td, "rowspan");
            let colspan = cell.colspan;
            cells.push(cell.clone());

            for offset in 0..colspan {
                while trackers.len() <= column + offset {
                    trackers.push(None);
                }
                trackers[column + offset] = if rowspan > 1 {
                    Some(SpanTracker {
                        cell: Cell {
                            colspan: 1,
                            ..cell.clone()
                        },
                        rows_left: rowspan - 1,
                        colspan: 1,
                    })
                } else {
                    None
                };
            }
            column += colspan;
        }
        trackers.truncate(column);

        self.align_row(cells)
    }

    fn extract_cell(&self, td: Element<'_>) -> Cell {
        let paragraphs: Vec<Element<'_>> = dom::subtree_elements(td)
            .into_iter()
            .filter(|e| dom::local_name(*e) == "p")
            .collect();
        let text = if paragraphs.is_empty() {
            dom::text_content_stripped(td)
        } else {
            paragraphs
                .iter()
                .map(|p| dom::text_content(*p).trim().to_string())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let html = if self.opts.unformatted_columns.is_empty() {
            None
        } else {
            Some(dom::inner_xml(td))
        };
        Cell {
            text: clean_extracted_text(&text),
            html,
            colspan: span_attribute(td, "colspan"),
        }
    }

    /// Aligns the row's cells with the column map.
    fn align_row(&mut self, cells: Vec<Cell>) -> indexmap::IndexMap<String, Value> {
        let keys: Vec<usize> = self.column_to_attr.keys().copied().collect();

        if !self.opts.skip_columns.is_empty()
            && keys.len().checked_sub(self.opts.skip_columns.len()) == Some(cells.len())
        {
            // The row is short by exactly the skippable columns: drop them
            // from the mapping for this row and align sequentially.
            self.skipped_columns = true;
            let kept: Vec<usize> = keys
                .iter()
                .copied()
                .filter(|key| !self.opts.skip_columns.contains(key))
                .collect();
            let mut row_data = indexmap::IndexMap::new();
            for (position, cell) in cells.iter().enumerate() {
                if let Some(key) = kept.get(position) {
                    let attr = &self.column_to_attr[key];
                    row_data.insert(attr.clone(), self.cell_value(cell, *key, attr));
                }
            }
            return row_data;
        }

        let mut row_data = indexmap::IndexMap::new();
        let mut cell_index = 0usize;
        let mut i = 0usize;
        while i < keys.len() {
            let attr = &self.column_to_attr[&keys[i]];
            if let Some(cell) = cells.get(cell_index) {
                row_data.insert(attr.clone(), self.cell_value(cell, keys[i], attr));
                // Attributes covered by a colspan stay aligned as nulls.
                for _ in 1..cell.colspan {
                    i += 1;
                    if let Some(key) = keys.get(i) {
                        row_data.insert(self.column_to_attr[key].clone(), Value::Null);
                    }
                }
                cell_index += 1;
            } else {
                row_data.insert(attr.clone(), Value::Null);
            }
            i += 1;
        }
        row_data
    }

    fn cell_value(&self, cell: &Cell, key: usize, attr: &str) -> Value {
        if self.opts.unformatted_columns.contains(&key) {
            if attr == self.name_attr {
                warn!(attr, "name attribute column cannot be unformatted; using text");
            } else if let Some(html) = &cell.html {
                return Value::Html(html.clone());
            }
        }
        Value::Text(cell.text.clone())
    }
}

fn span_attribute(td: Element<'_>, name: &str) -> usize {
    td.attribute_value(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
        .max(1)
}

/// Reads the target table id of an include row from its xref anchor.
fn include_target(row: Element<'_>) -> Option<String> {
    dom::subtree_elements(row)
        .into_iter()
        .find(|e| dom::local_name(*e) == "a" && dom::has_class(*e, "xref"))
        .and_then(|anchor| anchor.attribute_value("href"))
        .map(|href| href.splitn(2, '#').last().unwrap_or(href).to_string())
}

fn create_node(
    root: &mut Node,
    level_paths: &mut HashMap<usize, Vec<usize>>,
    row_level: usize,
    name_text: String,
    row_data: indexmap::IndexMap<String, Value>,
) {
    let parent_path = parent_path(level_paths, row_level);
    let parent = root
        .node_at_mut(&parent_path)
        .expect("level paths address existing nodes");
    let name = sanitize_name(&name_text);
    debug!(row_level, name = %name, parent = %parent.name, "creating node");
    parent.children.push(Node::with_attrs(name, row_data));

    let mut path = parent_path;
    path.push(parent.children.len() - 1);
    level_paths.insert(row_level, path);
}

/// Attaches the children of an included table's root under the node one
/// level above the include row.
fn splice_included(
    root: &mut Node,
    level_paths: &HashMap<usize, Vec<usize>>,
    row_level: usize,
    included: Node,
) {
    let parent_path = parent_path(level_paths, row_level);
    let parent = root
        .node_at_mut(&parent_path)
        .expect("level paths address existing nodes");
    parent.children.extend(included.children);
}

fn parent_path(level_paths: &HashMap<usize, Vec<usize>>, row_level: usize) -> Vec<usize> {
    row_level
        .checked_sub(1)
        .and_then(|level| level_paths.get(&level).cloned())
        .unwrap_or_default()
}

/// Extracts the header cells selected by the column map.
///
/// When the map's largest key does not fit the actual number of header
/// cells, the map values are realigned to contiguous `0..k` keys first;
/// the realigned map is also the one published on the metadata.
fn extract_header(
    table: Element<'_>,
    column_to_attr: &BTreeMap<usize, String>,
) -> (Vec<String>, BTreeMap<usize, String>) {
    let header_cells: Vec<Element<'_>> = dom::subtree_elements(table)
        .into_iter()
        .filter(|e| dom::local_name(*e) == "th")
        .collect();

    let max_key = column_to_attr.keys().next_back().copied().unwrap_or(0);
    let map: BTreeMap<usize, String> = if max_key >= header_cells.len() {
        column_to_attr
            .values()
            .cloned()
            .enumerate()
            .collect()
    } else {
        column_to_attr.clone()
    };

    let header = map
        .keys()
        .filter_map(|&column| header_cells.get(column))
        .map(|cell| dom::text_content_stripped(*cell))
        .collect();
    (header, map)
}

fn version_from_book(doc: &Document<'_>) -> Option<String> {
    let elements = dom::document_elements(doc);
    let titlepage = elements
        .iter()
        .copied()
        .find(|e| dom::local_name(*e) == "div" && dom::has_class(*e, "titlepage"))?;
    let subtitle = dom::subtree_elements(titlepage)
        .into_iter()
        .find(|e| dom::local_name(*e) == "h2" && dom::has_class(*e, "subtitle"))?;
    third_token(&dom::text_content(subtitle))
}

fn version_from_section(doc: &Document<'_>) -> Option<String> {
    let release = dom::document_elements(doc)
        .into_iter()
        .find(|e| dom::local_name(*e) == "span" && dom::has_class(*e, "documentreleaseinformation"))?;
    third_token(&dom::text_content(release))
}

fn third_token(text: &str) -> Option<String> {
    text.split_whitespace().nth(2).map(str::to_string)
}

/// Whether the name is a section title: it has at least one alphabetic
/// character and none in lower case. Single-character names like `A`
/// qualify.
fn is_all_uppercase(text: &str) -> bool {
    let mut has_cased = false;
    for c in text.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

/// Removes encoding artifacts from extracted cell text.
pub fn clean_extracted_text(text: &str) -> String {
    let cleaned = text
        .replace('\u{00c2}', "")
        .replace('\u{00a0}', " ")
        .replace('\u{200b}', "")
        // mojibake double quotes seen in some conversions
        .replace("\u{00e2}\u{0080}\u{009c}", "\"")
        .replace("\u{00e2}\u{0080}\u{009d}", "\"")
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'")
        .replace('\u{201c}', "\"")
        .replace('\u{201d}', "\"")
        .replace('\u{2014}', "-")
        .replace('\u{2013}', "-");
    cleaned.trim().to_string()
}

/// Sanitizes a row name into a node name: closest-ASCII lower case, `_`
/// for spaces, hyphens, and apostrophes, `-` for parentheses.
pub fn sanitize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.to_lowercase().chars() {
        match c {
            ' ' | '-' | '\'' => out.push('_'),
            '(' | ')' => out.push('-'),
            other => fold_ascii(other, &mut out),
        }
    }
    out
}

/// Closest-ASCII transliteration of the non-ASCII characters that occur in
/// the standard's tables; anything else passes through.
fn fold_ascii(c: char, out: &mut String) {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => out.push('a'),
        'ç' => out.push('c'),
        'è' | 'é' | 'ê' | 'ë' => out.push('e'),
        'ì' | 'í' | 'î' | 'ï' => out.push('i'),
        'ñ' => out.push('n'),
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => out.push('o'),
        'ù' | 'ú' | 'û' | 'ü' => out.push('u'),
        'ý' | 'ÿ' => out.push('y'),
        'æ' => out.push_str("ae"),
        'œ' => out.push_str("oe"),
        'ß' => out.push_str("ss"),
        'µ' => out.push('u'),
        '°' => out.push_str("deg"),
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sxd_document::parser;
    use sxd_document::Package;

    fn map(attrs: &[&str]) -> BTreeMap<usize, String> {
        attrs
            .iter()
            .enumerate()
            .map(|(i, a)| (i, a.to_string()))
            .collect()
    }

    fn parse_doc(text: &str) -> Package {
        parser::parse(text).expect("fixture is well-formed XML")
    }

    fn wrap_table(table_id: &str, thead: &str, tbody: &str) -> String {
        format!(
            r#"<html><body><div class="table"><a id="{table_id}"></a>
            <table><thead><tr>{thead}</tr></thead><tbody>{tbody}</tbody></table>
            </div></body></html>"#
        )
    }

    #[test]
    fn colspan_covers_following_columns_with_nulls() {
        let text = wrap_table(
            "table_T",
            "<th>A</th><th>B</th><th>C</th>",
            r#"<tr><td><p>A</p></td><td colspan="2"><p>B</p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        let (_, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_T",
                &map(&["a", "b", "c"]),
                "a",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        let node = &content.children[0];
        assert_eq!(node.attr_str("a"), Some("A"));
        assert_eq!(node.attr_str("b"), Some("B"));
        assert_eq!(node.attr("c"), Some(&Value::Null));
    }

    #[test]
    fn rowspan_carries_the_value_to_later_rows() {
        let text = wrap_table(
            "table_T",
            "<th>A</th><th>B</th>",
            r#"<tr><td rowspan="2"><p>A</p></td><td><p>B</p></td></tr>
               <tr><td><p>C</p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        let (_, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_T",
                &map(&["a", "b"]),
                "a",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        assert_eq!(content.children.len(), 2);
        assert_eq!(content.children[0].attr_str("a"), Some("A"));
        assert_eq!(content.children[0].attr_str("b"), Some("B"));
        assert_eq!(content.children[1].attr_str("a"), Some("A"));
        assert_eq!(content.children[1].attr_str("b"), Some("C"));
    }

    #[test]
    fn skip_columns_drop_out_and_the_map_is_rekeyed() {
        let text = wrap_table(
            "table_T",
            "<th>Name</th><th>Tag</th><th>Usage</th><th>Description</th>",
            r#"<tr><td><p>X</p></td><td><p>(1,2)</p></td><td><p>Desc</p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        let column_to_attr = map(&["n", "t", "u", "d"]);
        let opts = ParseOptions {
            skip_columns: &[2],
            ..Default::default()
        };
        let (metadata, content) = DomTableParser::new()
            .parse(&doc, "table_T", &column_to_attr, "n", &opts, None)
            .unwrap();

        let node = &content.children[0];
        assert_eq!(node.attr_str("n"), Some("X"));
        assert_eq!(node.attr_str("t"), Some("(1,2)"));
        assert_eq!(node.attr_str("d"), Some("Desc"));
        assert!(node.attr("u").is_none());

        let expected: BTreeMap<usize, String> =
            [(0, "n"), (1, "t"), (2, "d")]
                .into_iter()
                .map(|(k, v)| (k, v.to_string()))
                .collect();
        assert_eq!(metadata.column_to_attr, expected);
    }

    fn cyclic_doc() -> String {
        let table = |id: &str, attr: &str, desc: &str, target: &str| {
            format!(
                r##"<div class="table"><a id="{id}"></a>
                <table><thead><tr><th>Name</th><th>Description</th></tr></thead><tbody>
                <tr><td><p>{attr}</p></td><td><p>{desc}</p></td></tr>
                <tr><td colspan="2"><p>Include <a class="xref" href="#{target}">Table</a></p></td></tr>
                </tbody></table></div>"##
            )
        };
        format!(
            "<html><body>{}{}</body></html>",
            table("table_A", "Attr One", "first", "table_B"),
            table("table_B", "Attr Two", "second", "table_A"),
        )
    }

    #[test]
    fn include_cycles_terminate_with_a_placeholder() {
        let package = parse_doc(&cyclic_doc());
        let doc = package.as_document();

        let (_, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_A",
                &map(&["elem_name", "elem_description"]),
                "elem_name",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        let names: Vec<_> = content.iter().map(|n| n.name.clone()).collect();
        assert!(names.iter().any(|n| n.contains("include_table")));
        // Both tables contributed their data rows exactly once.
        assert!(names.iter().any(|n| n == "attr_one"));
        assert!(names.iter().any(|n| n == "attr_two"));
    }

    #[test]
    fn sibling_rows_may_include_the_same_table() {
        // Two include rows referencing the same table are not a cycle.
        let text = r##"<html><body>
            <div class="table"><a id="table_MAIN"></a>
            <table><thead><tr><th>Name</th><th>D</th></tr></thead><tbody>
            <tr><td colspan="2"><p>Include <a class="xref" href="#table_MACRO">M</a></p></td></tr>
            <tr><td colspan="2"><p>Include <a class="xref" href="#table_MACRO">M</a></p></td></tr>
            </tbody></table></div>
            <div class="table"><a id="table_MACRO"></a>
            <table><thead><tr><th>Name</th><th>D</th></tr></thead><tbody>
            <tr><td><p>Code Value</p></td><td><p>x</p></td></tr>
            </tbody></table></div>
            </body></html>"##;
        let package = parse_doc(text);
        let doc = package.as_document();

        let (_, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_MAIN",
                &map(&["elem_name", "elem_description"]),
                "elem_name",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        let names: Vec<_> = content
            .children
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, ["code_value", "code_value"]);
    }

    #[test]
    fn nested_include_rows_gain_nesting_markers() {
        let text = r##"<html><body>
            <div class="table"><a id="table_OUTER"></a>
            <table><thead><tr><th>Name</th><th>D</th></tr></thead><tbody>
            <tr><td><p>Some Sequence</p></td><td><p>seq</p></td></tr>
            <tr><td colspan="2"><p>&gt;Include <a class="xref" href="#table_INNER">I</a></p></td></tr>
            </tbody></table></div>
            <div class="table"><a id="table_INNER"></a>
            <table><thead><tr><th>Name</th><th>D</th></tr></thead><tbody>
            <tr><td><p>Code Value</p></td><td><p>x</p></td></tr>
            </tbody></table></div>
            </body></html>"##;
        let package = parse_doc(text);
        let doc = package.as_document();

        let (_, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_OUTER",
                &map(&["elem_name", "elem_description"]),
                "elem_name",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        let seq = &content.children[0];
        assert_eq!(seq.name, "some_sequence");
        assert_eq!(seq.children.len(), 1);
        // Spliced row carries the include row's nesting marker.
        assert_eq!(seq.children[0].name, ">code_value");
        assert_eq!(seq.children[0].attr_str("elem_name"), Some(">Code Value"));
    }

    #[test]
    fn include_depth_zero_keeps_the_include_row_as_data() {
        let package = parse_doc(&cyclic_doc());
        let doc = package.as_document();

        let opts = ParseOptions {
            include_depth: Some(0),
            ..Default::default()
        };
        let (metadata, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_A",
                &map(&["elem_name", "elem_description"]),
                "elem_name",
                &opts,
                None,
            )
            .unwrap();

        assert_eq!(metadata.include_depth, Some(0));
        let names: Vec<_> = content.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["attr_one", "include_table"]);
    }

    #[test]
    fn node_names_are_sanitized() {
        let text = wrap_table(
            "table_T",
            "<th>Name</th><th>Tag</th>",
            r#"<tr><td><p>Patient's Name (Test)</p></td><td><p>(0010,0010)</p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        let (_, content) = DomTableParser::new()
            .parse(
                &doc,
                "table_T",
                &map(&["elem_name", "elem_tag"]),
                "elem_name",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        assert_eq!(content.children[0].name, "patient_s_name_-test-");
    }

    #[test]
    fn header_realignment_publishes_contiguous_keys() {
        let text = wrap_table(
            "table_T",
            "<th>Name</th><th>Tag</th><th>Description</th>",
            r#"<tr><td><p>X</p></td><td><p>(1,2)</p></td><td><p>d</p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        // A map whose keys skip index 2, out of sync with the 3-column table.
        let mut column_to_attr = BTreeMap::new();
        column_to_attr.insert(0, "n".to_string());
        column_to_attr.insert(1, "t".to_string());
        column_to_attr.insert(4, "d".to_string());

        let (metadata, _) = DomTableParser::new()
            .parse(
                &doc,
                "table_T",
                &column_to_attr,
                "n",
                &ParseOptions::default(),
                None,
            )
            .unwrap();

        let keys: Vec<usize> = metadata.column_to_attr.keys().copied().collect();
        assert_eq!(keys, [0, 1, 2]);
        assert_eq!(metadata.header, vec!["Name", "Tag", "Description"]);
    }

    #[test]
    fn version_comes_from_the_book_subtitle() {
        let text = r#"<html><body>
            <div class="titlepage"><h2 class="subtitle">DICOM PS3.3 2025b - Information Object Definitions</h2></div>
            <div class="table"><a id="table_T"></a>
            <table><thead><tr><th>Name</th></tr></thead>
            <tbody><tr><td><p>X</p></td></tr></tbody></table></div>
            </body></html>"#;
        let package = parse_doc(text);
        let doc = package.as_document();

        let (metadata, _) = DomTableParser::new()
            .parse(&doc, "table_T", &map(&["n"]), "n", &ParseOptions::default(), None)
            .unwrap();
        assert_eq!(metadata.version, "2025b");
    }

    #[test]
    fn missing_version_is_empty() {
        let text = wrap_table("table_T", "<th>Name</th>", "<tr><td><p>X</p></td></tr>");
        let package = parse_doc(&text);
        let doc = package.as_document();
        let (metadata, _) = DomTableParser::new()
            .parse(&doc, "table_T", &map(&["n"]), "n", &ParseOptions::default(), None)
            .unwrap();
        assert_eq!(metadata.version, "");
    }

    #[test]
    fn missing_table_and_empty_map_are_errors() {
        let text = wrap_table("table_T", "<th>Name</th>", "<tr><td><p>X</p></td></tr>");
        let package = parse_doc(&text);
        let doc = package.as_document();
        let parser = DomTableParser::new();

        let err = parser
            .parse(&doc, "table_NOPE", &map(&["n"]), "n", &ParseOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));

        let err = parser
            .parse(&doc, "table_T", &BTreeMap::new(), "n", &ParseOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::BadMap));
    }

    #[test]
    fn progress_reaches_one_hundred_percent() {
        let text = wrap_table(
            "table_T",
            "<th>Name</th>",
            r#"<tr><td><p>One</p></td></tr><tr><td><p>Two</p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        let mut percents = Vec::new();
        {
            let mut observer = |p: &Progress| {
                assert_eq!(p.status, ProgressStatus::ParsingTable);
                percents.push(p.percent);
            };
            DomTableParser::new()
                .parse(
                    &doc,
                    "table_T",
                    &map(&["n"]),
                    "n",
                    &ParseOptions::default(),
                    Some(&mut observer),
                )
                .unwrap();
        }
        assert_eq!(percents, [50, 100]);
    }

    #[test]
    fn unformatted_columns_keep_inner_xml() {
        let text = wrap_table(
            "table_T",
            "<th>Name</th><th>Description</th>",
            r#"<tr><td><p>X</p></td><td><p>See <span class="italic">notes</span></p></td></tr>"#,
        );
        let package = parse_doc(&text);
        let doc = package.as_document();

        let opts = ParseOptions {
            unformatted_columns: &[1],
            ..Default::default()
        };
        let (_, content) = DomTableParser::new()
            .parse(&doc, "table_T", &map(&["n", "d"]), "n", &opts, None)
            .unwrap();

        let node = &content.children[0];
        assert_eq!(node.attr_str("n"), Some("X"));
        match node.attr("d") {
            Some(Value::Html(html)) => assert!(html.contains("<span class=\"italic\">")),
            other => panic!("expected HTML value, got {other:?}"),
        }
    }

    #[test]
    fn cleanup_normalises_quotes_and_dashes() {
        assert_eq!(
            clean_extracted_text("\u{201c}x\u{201d} \u{2013} y\u{200b}"),
            "\"x\" - y"
        );
        assert_eq!(clean_extracted_text("  a\u{00a0}b  "), "a b");
    }

    #[test]
    fn uppercase_heuristic_treats_single_letters_as_titles() {
        assert!(is_all_uppercase("GENERAL"));
        assert!(is_all_uppercase("A"));
        assert!(!is_all_uppercase("General"));
        assert!(!is_all_uppercase("(0010,0010)"));
    }
}
