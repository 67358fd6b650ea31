//! DOM navigation utilities for DICOM standard documents.
//!
//! The DocBook-to-XHTML stylesheets used by the standard enclose each table
//! in a `<div class="table">` carrying its identifier in an empty anchor,
//! `<a id="table_C.7-1"></a>`, with the `<table>` element following the
//! anchor. Module sections work the same way: `<a id="sect_C.7.1.1"></a>`
//! inside a `<div class="section">` that contains the module's table div.
//!
//! Lookups by anchor id go through XPath; the "element following the
//! anchor" and "enclosing section" relations are resolved by walking the
//! document in document order, which XPath 1.0 axes do not express cleanly.

use sxd_document::dom::{ChildOfElement, Document, Element, ParentOfChild};
use sxd_xpath::{Context, Factory, Value};
use tracing::warn;

/// Local (namespace-free) name of an element.
pub fn local_name<'d>(element: Element<'d>) -> &'d str {
    element.name().local_part()
}

/// Whether the element's `class` attribute contains the given token.
pub fn has_class(element: Element<'_>, class: &str) -> bool {
    element
        .attribute_value("class")
        .is_some_and(|value| value.split_whitespace().any(|token| token == class))
}

/// All elements of the document, in document order.
pub fn document_elements<'d>(doc: &Document<'d>) -> Vec<Element<'d>> {
    let mut elements = Vec::new();
    for child in doc.root().children() {
        if let Some(element) = child.element() {
            collect_elements(element, &mut elements);
        }
    }
    elements
}

/// The element and all of its descendant elements, in document order.
pub fn subtree_elements<'d>(root: Element<'d>) -> Vec<Element<'d>> {
    let mut elements = Vec::new();
    collect_elements(root, &mut elements);
    elements
}

fn collect_elements<'d>(element: Element<'d>, out: &mut Vec<Element<'d>>) {
    out.push(element);
    for child in element.children() {
        if let ChildOfElement::Element(child) = child {
            collect_elements(child, out);
        }
    }
}

/// Finds the first element with the given `id` attribute value.
pub fn find_by_id<'d>(doc: &Document<'d>, id: &str) -> Option<Element<'d>> {
    let factory = Factory::new();
    let expression = format!("//*[@id='{}']", id);
    let xpath = factory.build(&expression).ok().flatten()?;
    let context = Context::new();
    match xpath.evaluate(&context, doc.root()) {
        Ok(Value::Nodeset(nodes)) => nodes.document_order_first().and_then(|n| n.element()),
        _ => None,
    }
}

/// Concatenated text content of an element and its descendants.
pub fn text_content(element: Element<'_>) -> String {
    let mut out = String::new();
    append_text(element, false, &mut out);
    out
}

/// Concatenated text content with each text fragment trimmed.
pub fn text_content_stripped(element: Element<'_>) -> String {
    let mut out = String::new();
    append_text(element, true, &mut out);
    out
}

fn append_text(element: Element<'_>, strip: bool, out: &mut String) {
    for child in element.children() {
        match child {
            ChildOfElement::Text(text) => {
                if strip {
                    out.push_str(text.text().trim());
                } else {
                    out.push_str(text.text());
                }
            }
            ChildOfElement::Element(child) => append_text(child, strip, out),
            _ => {}
        }
    }
}

/// Serializes the children of an element back to an XML fragment.
pub fn inner_xml(element: Element<'_>) -> String {
    let mut out = String::new();
    for child in element.children() {
        write_child(child, &mut out);
    }
    out
}

fn write_child(child: ChildOfElement<'_>, out: &mut String) {
    match child {
        ChildOfElement::Element(element) => {
            out.push('<');
            out.push_str(local_name(element));
            for attribute in element.attributes() {
                out.push(' ');
                out.push_str(attribute.name().local_part());
                out.push_str("=\"");
                out.push_str(&escape_xml(attribute.value()));
                out.push('"');
            }
            let children = element.children();
            if children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in children {
                    write_child(child, out);
                }
                out.push_str("</");
                out.push_str(local_name(element));
                out.push('>');
            }
        }
        ChildOfElement::Text(text) => out.push_str(&escape_xml(text.text())),
        _ => {}
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Finds the `<table>` element identified by the given anchor id.
///
/// Locates `<a id="…">` and returns the first `<table>` following it in
/// document order. A missing anchor or missing table logs a warning and
/// returns `None`.
pub fn find_table<'d>(doc: &Document<'d>, table_id: &str) -> Option<Element<'d>> {
    let Some(anchor) = find_by_id(doc, table_id) else {
        warn!("Table Id {table_id} not found.");
        return None;
    };
    let elements = document_elements(doc);
    let position = elements.iter().position(|e| *e == anchor)?;
    let table = elements[position + 1..]
        .iter()
        .copied()
        .find(|e| local_name(*e) == "table");
    if table.is_none() {
        warn!("Table {table_id} not found.");
    }
    table
}

/// Resolves the table id that belongs to a section anchor.
///
/// Locates `<a id="sect_…">`, walks up to the enclosing
/// `<div class="section">`, finds the first `<div class="table">` within
/// it, and returns the id of the first anchor inside that div. Every
/// failure logs a specific warning and returns `None`.
pub fn section_to_table_id(doc: &Document<'_>, section_anchor: &str) -> Option<String> {
    let Some(anchor) = find_by_id(doc, section_anchor) else {
        warn!("Section with id '{section_anchor}' not found.");
        return None;
    };

    let mut section = None;
    let mut current = anchor;
    while let Some(ParentOfChild::Element(parent)) = current.parent() {
        if local_name(parent) == "div" && has_class(parent, "section") {
            section = Some(parent);
            break;
        }
        current = parent;
    }
    let Some(section) = section else {
        warn!("No parent <div class='section'> found for section id '{section_anchor}'.");
        return None;
    };

    let table_div = subtree_elements(section)
        .into_iter()
        .find(|e| local_name(*e) == "div" && has_class(*e, "table"));
    let Some(table_div) = table_div else {
        warn!("No <div class='table'> found in section for section id '{section_anchor}'.");
        return None;
    };

    let table_id = subtree_elements(table_div)
        .into_iter()
        .filter(|e| local_name(*e) == "a")
        .find_map(|e| e.attribute_value("id").map(str::to_string));
    if table_id.is_none() {
        warn!("No table id found in <div class='table'> for section id '{section_anchor}'.");
    }
    table_id
}
