//! Cache-first pipelines assembling DICOM specification models.
//!
//! Three orchestrators sit on top of the document handlers and parsers:
//!
//! - [`SpecFactory`] builds one model from one table, consulting the
//!   model cache before touching the document.
//! - [`IodSpecBuilder`] expands an IOD modules table by building or
//!   reusing each referenced module's model and grafting its rows under
//!   the referencing IOD node.
//! - [`SpecMerger`] chains path- or node-based merges over a sequence of
//!   models, with strict validation of cached merge results.

pub mod factory;
pub mod iod;
pub mod merger;

pub use factory::{ModelRequest, SpecFactory};
pub use iod::{IodRequest, IodSpecBuilder};
pub use merger::{MergeRequest, SpecMerger};
