//! Parsers turning DICOM standard tables into specification models.
//!
//! Two table sources are supported:
//!
//! - XHTML documents of the standard, parsed as a DOM and walked by the
//!   [`table::DomTableParser`] with full span propagation and recursive
//!   `Include` expansion; the [`dom`] module holds the navigation
//!   primitives (anchor lookup, following-table resolution, section to
//!   table id mapping).
//! - Pre-extracted logical tables (for example from PDF documents),
//!   projected into the same model shape by [`csv::CsvTableParser`].

pub mod csv;
pub mod dom;
pub mod table;

pub use csv::{CsvTableParser, LogicalTable};
pub use table::{DomTableParser, Error, ParseOptions};
