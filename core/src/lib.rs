//! Core model library for DICOM specification extraction.
//!
//! This crate holds the data model shared by the whole `dcmspec` pipeline:
//! the specification tree ([`Node`], [`Value`], [`Metadata`], [`SpecModel`]),
//! its DIMSE/role specialisation ([`ServiceAttributeModel`]), the JSON
//! store that persists models on the `model/` cache tier, the module
//! registry shared across IOD builds, progress reporting, and the
//! application configuration.
//!
//! ## Overview
//!
//! - A specification table parses into a [`SpecModel`]: a `metadata` record
//!   describing the table (version, header, column map) and a `content`
//!   tree with one node per data row, nested by the `>` markers of the
//!   DICOM standard.
//! - Models can be filtered ([`SpecModel::exclude_titles`],
//!   [`SpecModel::filter_required`]) and enriched by merging attributes
//!   from other models ([`SpecModel::merge_matching_path`],
//!   [`SpecModel::merge_matching_node`]).
//! - [`JsonSpecStore`] serializes a model to a single JSON file and back,
//!   preserving tree shape, attribute order, and the integer keys of the
//!   column map.

pub mod config;
pub mod metadata;
pub mod model;
pub mod node;
pub mod progress;
pub mod registry;
pub mod service;
pub mod store;

pub use config::Config;
pub use metadata::Metadata;
pub use model::{MatchBy, MergeOptions, SpecModel};
pub use node::{Node, Value};
pub use progress::{Progress, ProgressObserver, ProgressStatus};
pub use registry::ModuleRegistry;
pub use service::{DimseMapping, ServiceAttributeModel, ServiceRole, ALL_DIMSE};
pub use store::JsonSpecStore;
