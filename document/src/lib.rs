//! Cache-aware acquisition of DICOM standard and IHE documents.
//!
//! Handlers share one contract: compute the document's path on the
//! `standard/` cache tier, download it when absent or forced (requiring a
//! URL), persist the bytes, and parse the persisted file into the
//! format-specific artifact — a DOM package for XHTML, a logical table for
//! PDF. HTTP access sits behind [`fetch::HttpFetch`] and PDF extraction
//! behind [`pdf::TableExtractor`], so everything above those seams can be
//! tested offline.

pub mod fetch;
pub mod pdf;
pub mod xhtml;

pub use fetch::{HttpFetch, UreqFetcher};
pub use pdf::{NotePatterns, PdfDocHandler, PdfTable, TableExtractor};
pub use xhtml::{UpsXhtmlDocHandler, XhtmlDocHandler, XhtmlSource};
