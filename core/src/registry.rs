//! Registry for sharing module models across IOD builds.
//!
//! A `table_id` is the anchor identifier of a DICOM table, for example
//! `table_C.7-1` from `<a id="table_C.7-1"></a>`. Many IODs reference the
//! same modules; registering a built module model under its table id lets
//! later builds reuse it instead of parsing the table again.
//!
//! The registry is not thread safe. A caller who parallelises IOD builds
//! must wrap it externally.

use indexmap::IndexMap;

use crate::model::SpecModel;

/// In-memory map from table id to module model.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, SpecModel>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the module model registered under the table id, if any.
    pub fn get(&self, table_id: &str) -> Option<&SpecModel> {
        self.modules.get(table_id)
    }

    /// Registers a module model under its table id, replacing any
    /// previous entry.
    pub fn insert(&mut self, table_id: impl Into<String>, model: SpecModel) {
        self.modules.insert(table_id.into(), model);
    }

    /// Whether a module is registered under the table id.
    pub fn contains(&self, table_id: &str) -> bool {
        self.modules.contains_key(table_id)
    }

    /// Iterates over registered table ids in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Iterates over registered module models in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &SpecModel> {
        self.modules.values()
    }

    /// Iterates over `(table_id, model)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SpecModel)> {
        self.modules.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
