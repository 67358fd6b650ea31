//! Hierarchical specification model built from DICOM standard tables.
//!
//! A [`SpecModel`] pairs a [`Metadata`] record with a content tree whose
//! root node is named `content`. Models can be filtered (title rows,
//! optional attributes) and enriched by merging attributes from another
//! model, matching nodes either by their path from the root or anywhere in
//! the tree.

use std::collections::HashMap;
use std::str::FromStr;

use snafu::Snafu;
use tracing::debug;

use crate::metadata::Metadata;
use crate::node::Node;

/// Requirement codes kept by default when filtering optional attributes.
pub const DEFAULT_KEEP: &[&str] = &["1", "1C", "2", "2C"];
/// Requirement codes removed by default when filtering optional attributes.
pub const DEFAULT_REMOVE: &[&str] = &["3"];

/// Requirement codes under which a sequence's items need not be present.
const EMPTIABLE_SEQUENCE: &[&str] = &["3", "2", "2C", "-", "O", "Not allowed"];

/// The `match_by` argument given to a merge was not recognized.
#[derive(Debug, Snafu)]
#[snafu(display("invalid match_by `{value}`; expected `name` or `attribute`"))]
pub struct InvalidMatchBy {
    pub value: String,
}

/// How two nodes are compared during a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchBy {
    /// Compare node names.
    #[default]
    Name,
    /// Compare the value of a designated attribute.
    Attribute,
}

impl FromStr for MatchBy {
    type Err = InvalidMatchBy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(MatchBy::Name),
            "attribute" => Ok(MatchBy::Attribute),
            _ => Err(InvalidMatchBy { value: s.into() }),
        }
    }
}

/// Options for the merge primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions<'a> {
    /// How nodes are matched between the two trees.
    pub match_by: MatchBy,
    /// Attribute compared when matching by attribute.
    pub attribute_name: Option<&'a str>,
    /// Attributes copied from a matched node; `None` copies all of them.
    pub merge_attrs: Option<&'a [String]>,
    /// Allow the left tree's `content → module → …` levels to align with
    /// the right tree's `content → …` by skipping the module level.
    pub ignore_module_level: bool,
}

/// A specification model: metadata plus a content tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecModel {
    pub metadata: Metadata,
    pub content: Node,
}

impl SpecModel {
    /// Creates a model from its two subtrees.
    pub fn new(metadata: Metadata, content: Node) -> Self {
        SpecModel { metadata, content }
    }

    /// Whether the node is an include placeholder left by a suppressed
    /// table expansion.
    pub fn is_include(node: &Node) -> bool {
        node.name.contains("include_table")
    }

    /// Whether the node is a module title row: only the attribute of
    /// column 0 is set, every other mapped attribute is unset, and the
    /// node is not an include placeholder.
    pub fn is_module_title(&self, node: &Node) -> bool {
        is_module_title_in(node, &self.metadata.column_to_attr)
    }

    /// Removes every module title row from the content tree.
    pub fn exclude_titles(&mut self) {
        fn walk(node: &mut Node, map: &std::collections::BTreeMap<usize, String>) {
            node.children.retain(|child| {
                if is_module_title_in(child, map) {
                    debug!(name = %child.name, "removing module title node");
                    false
                } else {
                    true
                }
            });
            for child in &mut node.children {
                walk(child, map);
            }
        }

        let map = self.metadata.column_to_attr.clone();
        walk(&mut self.content, &map);
    }

    /// Removes nodes whose requirement attribute marks them optional.
    ///
    /// Nodes whose `attr` value is in `remove` and not in `keep` are
    /// dropped with their subtree. Independently, a node whose name
    /// contains `_sequence` and whose requirement allows the sequence to
    /// be empty loses all of its descendants while surviving itself.
    pub fn filter_required(&mut self, attr: &str, keep: &[&str], remove: &[&str]) {
        fn walk(node: &mut Node, attr: &str, keep: &[&str], remove: &[&str]) {
            node.children.retain(|child| {
                match child.attr_str(attr) {
                    Some(value) if remove.contains(&value) && !keep.contains(&value) => {
                        debug!(value, name = %child.name, "removing optional element");
                        false
                    }
                    _ => true,
                }
            });
            for child in &mut node.children {
                if child.name.contains("_sequence") {
                    if let Some(value) = child.attr_str(attr) {
                        if EMPTIABLE_SEQUENCE.contains(&value) {
                            debug!(value, name = %child.name, "removing emptiable sequence items");
                            child.children.clear();
                        }
                    }
                }
                walk(child, attr, keep, remove);
            }
        }

        walk(&mut self.content, attr, keep, remove);
    }

    /// Merges attributes from `other` onto nodes whose path from the
    /// content root matches, returning the merged model.
    ///
    /// The path of a node is the sequence of match keys (name or attribute
    /// value) of its ancestors below the content root, ending at the node
    /// itself. With `ignore_module_level`, a left path that misses is
    /// retried with its first component removed.
    pub fn merge_matching_path(&self, other: &SpecModel, opts: &MergeOptions) -> SpecModel {
        let mut index: HashMap<Vec<String>, &Node> = HashMap::new();
        let mut path = Vec::new();
        index_paths(&other.content, &mut path, opts, &mut index);

        let mut merged = self.clone();
        let mut left_path = Vec::new();
        for i in 0..merged.content.children.len() {
            merge_path_walk(&mut merged.content.children[i], &mut left_path, &index, opts);
        }
        merged
    }

    /// Merges attributes from any node of `other` with an equal match key,
    /// regardless of position, returning the merged model.
    ///
    /// When several right nodes share a key, the first in pre-order wins.
    pub fn merge_matching_node(&self, other: &SpecModel, opts: &MergeOptions) -> SpecModel {
        let mut index: HashMap<String, &Node> = HashMap::new();
        for node in other.content.iter() {
            if let Some(key) = node_key(node, opts) {
                index.entry(key).or_insert(node);
            }
        }

        let mut merged = self.clone();
        merged.content.for_each_mut(&mut |node| {
            if node.name == "content" {
                return;
            }
            if let Some(key) = node_key(node, opts) {
                if let Some(source) = index.get(&key) {
                    copy_attrs(node, source, opts.merge_attrs);
                }
            }
        });
        merged
    }
}

fn is_module_title_in(node: &Node, map: &std::collections::BTreeMap<usize, String>) -> bool {
    let Some(col0_attr) = map.get(&0) else {
        return false;
    };
    if SpecModel::is_include(node) || !node.has_attr(col0_attr) {
        return false;
    }
    map.iter()
        .filter(|(&col, _)| col != 0)
        .all(|(_, attr)| !node.has_attr(attr))
}

/// Match key of a node, or `None` when matching by an attribute the node
/// does not carry.
fn node_key(node: &Node, opts: &MergeOptions) -> Option<String> {
    match opts.match_by {
        MatchBy::Name => Some(node.name.clone()),
        MatchBy::Attribute => opts
            .attribute_name
            .and_then(|attr| node.attr_str(attr))
            .map(str::to_string),
    }
}

/// Path component of a node; ancestors without the match attribute fall
/// back to their name so that structural levels still contribute a key.
fn path_key(node: &Node, opts: &MergeOptions) -> String {
    node_key(node, opts).unwrap_or_else(|| node.name.clone())
}

fn index_paths<'a>(
    root: &'a Node,
    path: &mut Vec<String>,
    opts: &MergeOptions,
    index: &mut HashMap<Vec<String>, &'a Node>,
) {
    for child in &root.children {
        path.push(path_key(child, opts));
        index.entry(path.clone()).or_insert(child);
        index_paths(child, path, opts, index);
        path.pop();
    }
}

fn merge_path_walk(
    node: &mut Node,
    path: &mut Vec<String>,
    index: &HashMap<Vec<String>, &Node>,
    opts: &MergeOptions,
) {
    path.push(path_key(node, opts));
    let source = index.get(path.as_slice()).copied().or_else(|| {
        if opts.ignore_module_level && path.len() >= 2 {
            index.get(&path[1..]).copied()
        } else {
            None
        }
    });
    if let Some(source) = source {
        copy_attrs(node, source, opts.merge_attrs);
    }
    for i in 0..node.children.len() {
        merge_path_walk(&mut node.children[i], path, index, opts);
    }
    path.pop();
}

/// Copies attributes from `src` onto `dst`; the right side overwrites when
/// present and never removes anything.
fn copy_attrs(dst: &mut Node, src: &Node, merge_attrs: Option<&[String]>) {
    match merge_attrs {
        Some(attrs) => {
            for attr in attrs {
                if let Some(value) = src.attrs.get(attr) {
                    dst.attrs.insert(attr.clone(), value.clone());
                }
            }
        }
        None => {
            for (key, value) in &src.attrs {
                dst.attrs.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;
    use indexmap::IndexMap;

    fn attrs(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn base_metadata() -> Metadata {
        let mut meta = Metadata::default();
        meta.column_to_attr.insert(0, "elem_name".into());
        meta.column_to_attr.insert(1, "elem_tag".into());
        meta.column_to_attr.insert(2, "elem_type".into());
        meta
    }

    fn element(name: &str, tag: &str, dcmtype: &str) -> Node {
        Node::with_attrs(
            name,
            attrs(&[
                ("elem_name", Value::from(name)),
                ("elem_tag", Value::from(tag)),
                ("elem_type", Value::from(dcmtype)),
            ]),
        )
    }

    #[test]
    fn merge_with_self_and_no_attrs_is_identity() {
        let mut content = Node::new("content");
        let mut parent = element("patient_name", "(0010,0010)", "1");
        parent.children.push(element("code_value", "(0008,0100)", "1C"));
        content.children.push(parent);
        let model = SpecModel::new(base_metadata(), content);

        let merged = model.merge_matching_path(
            &model,
            &MergeOptions {
                merge_attrs: Some(&[]),
                ..Default::default()
            },
        );
        assert_eq!(merged, model);
    }

    #[test]
    fn node_merge_by_attribute_hits_every_depth() {
        // Left holds the same tag at depth 1 and depth 2.
        let mut content = Node::new("content");
        let mut seq = element("some_sequence", "(0101,1011)", "1");
        seq.children.push(element("nested", "(0101,1011)", "1"));
        content.children.push(seq);
        let left = SpecModel::new(base_metadata(), content);

        let mut right_content = Node::new("content");
        let mut enriched = element("whatever", "(0101,1011)", "3");
        enriched.set_attr("vr", Value::from("DS"));
        right_content.children.push(enriched);
        let right = SpecModel::new(base_metadata(), right_content);

        let merge_attrs = vec!["vr".to_string()];
        let merged = left.merge_matching_node(
            &right,
            &MergeOptions {
                match_by: MatchBy::Attribute,
                attribute_name: Some("elem_tag"),
                merge_attrs: Some(&merge_attrs),
                ..Default::default()
            },
        );

        let outer = &merged.content.children[0];
        let inner = &outer.children[0];
        assert_eq!(outer.attr_str("vr"), Some("DS"));
        assert_eq!(inner.attr_str("vr"), Some("DS"));
        // only the requested attribute was merged
        assert_eq!(outer.attr_str("elem_type"), Some("1"));
    }

    #[test]
    fn path_merge_can_skip_the_module_level() {
        let mut content = Node::new("content");
        let mut module = Node::new("patient");
        module.children.push(element("patient_name", "(0010,0010)", "2"));
        content.children.push(module);
        let left = SpecModel::new(base_metadata(), content);

        let mut right_content = Node::new("content");
        let mut enriched = element("patient_name", "(0010,0010)", "2");
        enriched.set_attr("vr", Value::from("PN"));
        right_content.children.push(enriched);
        let right = SpecModel::new(base_metadata(), right_content);

        let merge_attrs = vec!["vr".to_string()];
        let opts = MergeOptions {
            match_by: MatchBy::Attribute,
            attribute_name: Some("elem_tag"),
            merge_attrs: Some(&merge_attrs),
            ignore_module_level: true,
        };

        let merged = left.merge_matching_path(&right, &opts);
        let node = &merged.content.children[0].children[0];
        assert_eq!(node.attr_str("vr"), Some("PN"));

        // Without the option the paths differ and nothing is merged.
        let strict = left.merge_matching_path(
            &right,
            &MergeOptions {
                ignore_module_level: false,
                ..opts
            },
        );
        assert_eq!(strict.content.children[0].children[0].attr_str("vr"), None);
    }

    #[test]
    fn exclude_titles_drops_single_column_rows() {
        let mut content = Node::new("content");
        // Title row: only column 0 set, the rest covered by a span.
        let title = Node::with_attrs(
            "general_module",
            attrs(&[
                ("elem_name", Value::from("GENERAL MODULE")),
                ("elem_tag", Value::Null),
                ("elem_type", Value::Null),
            ]),
        );
        content.children.push(title);
        content.children.push(element("patient_name", "(0010,0010)", "1"));
        let placeholder = Node::with_attrs(
            "include_table_c.7_1",
            attrs(&[
                ("elem_name", Value::from(">Include table_C.7-1")),
                ("elem_tag", Value::Null),
                ("elem_type", Value::Null),
            ]),
        );
        content.children.push(placeholder);

        let mut model = SpecModel::new(base_metadata(), content);
        model.exclude_titles();

        let names: Vec<_> = model
            .content
            .children
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, ["patient_name", "include_table_c.7_1"]);
    }

    #[test]
    fn filter_required_removes_optional_and_empties_sequences() {
        let mut content = Node::new("content");
        content.children.push(element("patient_name", "(0010,0010)", "1"));
        content.children.push(element("patient_comments", "(0010,4000)", "3"));
        let mut seq = element("referenced_study_sequence", "(0008,1110)", "2");
        seq.children.push(element("referenced_sop_class_uid", "(0008,1150)", "1"));
        content.children.push(seq);

        let mut model = SpecModel::new(base_metadata(), content);
        model.filter_required("elem_type", DEFAULT_KEEP, DEFAULT_REMOVE);

        let names: Vec<_> = model
            .content
            .children
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, ["patient_name", "referenced_study_sequence"]);
        // Type 2 sequence survives but loses its items.
        assert!(model.content.children[1].children.is_empty());
    }

    #[test]
    fn match_by_parses_or_rejects() {
        assert_eq!("name".parse::<MatchBy>().unwrap(), MatchBy::Name);
        assert_eq!("attribute".parse::<MatchBy>().unwrap(), MatchBy::Attribute);
        assert!("path".parse::<MatchBy>().is_err());
    }
}
