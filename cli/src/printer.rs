//! Read-only rendering of specification models.

use std::io::{self, Write};

use dcmspec_core::model::SpecModel;
use dcmspec_core::node::Node;

/// Prints a model as a flat table or an indented tree.
pub struct SpecPrinter<'a> {
    model: &'a SpecModel,
}

impl<'a> SpecPrinter<'a> {
    pub fn new(model: &'a SpecModel) -> Self {
        SpecPrinter { model }
    }

    /// Prints every node as one table row, columns per the metadata.
    pub fn print_table(&self, out: &mut impl Write) -> io::Result<()> {
        let attrs: Vec<&String> = self.model.metadata.column_to_attr.values().collect();
        let header = &self.model.metadata.header;

        let mut rows: Vec<Vec<String>> = Vec::new();
        for node in self.model.content.iter() {
            if node.name == "content" {
                continue;
            }
            rows.push(
                attrs
                    .iter()
                    .map(|attr| node.attr_str(attr).unwrap_or("").replace('\n', " "))
                    .collect(),
            );
        }

        // column widths over header and data
        let columns = attrs.len().max(header.len());
        let mut widths = vec![0usize; columns];
        for (i, cell) in header.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        write_row(out, header, &widths)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_row(out, &rule, &widths)?;
        for row in &rows {
            write_row(out, row, &widths)?;
        }
        Ok(())
    }

    /// Prints the content tree with box-drawing guides.
    pub fn print_tree(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", self.model.content.name)?;
        let count = self.model.content.children.len();
        for (index, child) in self.model.content.children.iter().enumerate() {
            print_subtree(out, child, "", index + 1 == count)?;
        }
        Ok(())
    }
}

fn write_row(out: &mut impl Write, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let mut line = String::new();
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            line.push_str(" | ");
        }
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        line.push_str(cell);
        for _ in cell.chars().count()..*width {
            line.push(' ');
        }
    }
    writeln!(out, "{}", line.trim_end())
}

fn print_subtree(out: &mut impl Write, node: &Node, prefix: &str, last: bool) -> io::Result<()> {
    let guide = if last { "└── " } else { "├── " };
    let tag = node
        .attr_str("elem_tag")
        .map(|tag| format!(" {tag}"))
        .unwrap_or_default();
    writeln!(out, "{prefix}{guide}{}{tag}", node.name)?;

    let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
    let count = node.children.len();
    for (index, child) in node.children.iter().enumerate() {
        print_subtree(out, child, &child_prefix, index + 1 == count)?;
    }
    Ok(())
}
