//! Chained merging of specification models with cache validation.
//!
//! Typical uses: enriching a PS3.3 module attributes model with VR/VM
//! columns from the PS3.6 data element dictionary, or layering an IHE
//! profile's requirements over a PS3.4 service attribute model. Merges
//! chain left to right; the merged result can be cached, and a cached
//! result is only trusted when its columns exactly reflect the requested
//! merge.

use std::collections::HashSet;
use std::str::FromStr;

use snafu::{ensure, ResultExt, Snafu};
use tracing::{info, warn};

use dcmspec_core::config::Config;
use dcmspec_core::model::{InvalidMatchBy, MatchBy, MergeOptions, SpecModel};
use dcmspec_core::store::JsonSpecStore;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// No models were given to merge.
    #[snafu(display("no models to merge"))]
    NoModels,

    /// A per-step argument list does not have one entry per merge.
    #[snafu(display("{what} has {actual} entries but {expected} merges are requested"))]
    StepCountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The merge method is not recognized.
    #[snafu(display("unknown merge method `{method}`"))]
    UnknownMethod { method: String },

    /// The match_by argument is not recognized.
    #[snafu(display("invalid match_by argument"))]
    BadMatchBy { source: InvalidMatchBy },
}

type Result<T> = std::result::Result<T, Error>;

/// How matched nodes are located in the right-hand model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMethod {
    MatchingPath,
    MatchingNode,
}

impl FromStr for MergeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "matching_path" => Ok(MergeMethod::MatchingPath),
            "matching_node" => Ok(MergeMethod::MatchingNode),
            _ => Err(Error::UnknownMethod { method: s.into() }),
        }
    }
}

/// Parameters of one [`SpecMerger::merge_many`] call.
///
/// `attribute_names` and `merge_attrs` carry one entry per merge step,
/// i.e. one fewer than the number of models.
#[derive(Debug, Clone, Default)]
pub struct MergeRequest<'a> {
    /// `matching_path` or `matching_node`.
    pub method: &'a str,
    /// `name` or `attribute`.
    pub match_by: &'a str,
    /// Attribute compared per step when matching by attribute.
    pub attribute_names: Vec<Option<&'a str>>,
    /// Attributes copied per step; `None` copies all.
    pub merge_attrs: Vec<Option<Vec<String>>>,
    /// Skip the module level of the left tree when path matching.
    pub ignore_module_level: bool,
    /// Cache file name for the merged model.
    pub json_file_name: Option<&'a str>,
    /// Always merge, overwriting any cached result.
    pub force_update: bool,
}

/// Merges sequences of specification models, cache first.
pub struct SpecMerger {
    config: Config,
    store: JsonSpecStore,
}

impl SpecMerger {
    pub fn new(config: Config) -> Self {
        SpecMerger {
            config,
            store: JsonSpecStore::new(),
        }
    }

    /// Merges two models by node matching.
    pub fn merge_node(
        &self,
        left: &SpecModel,
        right: &SpecModel,
        match_by: &str,
        attribute_name: Option<&str>,
        merge_attrs: Option<Vec<String>>,
        json_file_name: Option<&str>,
        force_update: bool,
    ) -> Result<SpecModel> {
        self.merge_many(
            &[left, right],
            &MergeRequest {
                method: "matching_node",
                match_by,
                attribute_names: vec![attribute_name],
                merge_attrs: vec![merge_attrs],
                json_file_name,
                force_update,
                ..Default::default()
            },
        )
    }

    /// Merges two models by path matching.
    pub fn merge_path(
        &self,
        left: &SpecModel,
        right: &SpecModel,
        match_by: &str,
        attribute_name: Option<&str>,
        merge_attrs: Option<Vec<String>>,
        json_file_name: Option<&str>,
        force_update: bool,
    ) -> Result<SpecModel> {
        self.merge_many(
            &[left, right],
            &MergeRequest {
                method: "matching_path",
                match_by,
                attribute_names: vec![attribute_name],
                merge_attrs: vec![merge_attrs],
                json_file_name,
                force_update,
                ..Default::default()
            },
        )
    }

    /// Merges a sequence of models left to right.
    ///
    /// With a cache file name and no forced update, a cached merged model
    /// is returned instead, provided it passes validation; an invalid
    /// cache logs at info level and is rebuilt.
    pub fn merge_many(&self, models: &[&SpecModel], request: &MergeRequest<'_>) -> Result<SpecModel> {
        ensure!(!models.is_empty(), NoModelsSnafu);
        let steps = models.len() - 1;
        ensure!(
            request.attribute_names.len() == steps,
            StepCountMismatchSnafu {
                what: "attribute_names",
                expected: steps,
                actual: request.attribute_names.len(),
            }
        );
        ensure!(
            request.merge_attrs.len() == steps,
            StepCountMismatchSnafu {
                what: "merge_attrs",
                expected: steps,
                actual: request.merge_attrs.len(),
            }
        );

        let method: MergeMethod = request.method.parse()?;
        let match_by: MatchBy = request.match_by.parse().context(BadMatchBySnafu)?;

        if let Some(model) = self.load_merged_from_cache(request, models[0]) {
            return Ok(model);
        }

        let mut merged = models[0].clone();
        for (step, right) in models[1..].iter().enumerate() {
            let opts = MergeOptions {
                match_by,
                attribute_name: request.attribute_names[step],
                merge_attrs: request.merge_attrs[step].as_deref(),
                ignore_module_level: request.ignore_module_level,
            };
            merged = match method {
                MergeMethod::MatchingPath => merged.merge_matching_path(right, &opts),
                MergeMethod::MatchingNode => merged.merge_matching_node(right, &opts),
            };
        }

        update_metadata(&mut merged, &models[1..], &request.merge_attrs);

        if let Some(json_file_name) = request.json_file_name {
            let path = self.config.model_path(json_file_name);
            if let Err(e) = self.store.save(&merged, &path) {
                warn!(path = %path.display(), "failed to cache merged model: {e}");
            }
        } else {
            info!("no cache file name given; merged model not cached");
        }

        Ok(merged)
    }

    /// Loads and validates a cached merged model.
    ///
    /// All requested merge attributes must appear in the cached column
    /// map, and no attribute outside the left model's columns plus the
    /// requested ones may appear. Either failure is treated as a cache
    /// miss.
    fn load_merged_from_cache(
        &self,
        request: &MergeRequest<'_>,
        left: &SpecModel,
    ) -> Option<SpecModel> {
        let json_file_name = request.json_file_name?;
        if request.force_update {
            return None;
        }
        let path = self.config.model_path(json_file_name);
        if !path.exists() {
            return None;
        }

        let model = match self.store.load(&path) {
            Ok(model) => model,
            Err(e) => {
                warn!(path = %path.display(), "failed to load merged model: {e}");
                return None;
            }
        };

        let requested: HashSet<&str> = request
            .merge_attrs
            .iter()
            .flatten()
            .flat_map(|attrs| attrs.iter().map(String::as_str))
            .collect();
        let cached: HashSet<&str> = model
            .metadata
            .column_to_attr
            .values()
            .map(String::as_str)
            .collect();

        if requested.iter().any(|attr| !cached.contains(attr)) {
            info!(
                path = %path.display(),
                "cached merged model is missing requested attributes; ignoring cache"
            );
            return None;
        }

        let original: HashSet<&str> = left
            .metadata
            .column_to_attr
            .values()
            .map(String::as_str)
            .collect();
        let mut extras = cached
            .iter()
            .filter(|attr| !requested.contains(**attr) && !original.contains(**attr))
            .peekable();
        if extras.peek().is_some() {
            info!(
                path = %path.display(),
                "cached merged model contains attributes that were not requested; ignoring cache"
            );
            return None;
        }

        info!(path = %path.display(), "loaded merged model from cache");
        Some(model)
    }
}

/// Appends a header and column map entry for every merged attribute that
/// the left model did not already carry, preferring the right model's
/// header text.
fn update_metadata(
    merged: &mut SpecModel,
    rights: &[&SpecModel],
    merge_attrs: &[Option<Vec<String>>],
) {
    for (step, right) in rights.iter().enumerate() {
        let Some(attrs) = &merge_attrs[step] else {
            continue;
        };
        for (column, attr) in &right.metadata.column_to_attr {
            if !attrs.contains(attr) || merged.metadata.has_attr(attr) {
                continue;
            }
            let header_cell = right
                .metadata
                .header
                .get(*column)
                .cloned()
                .unwrap_or_else(|| attr.clone());
            merged.metadata.header.push(header_cell);
            let next = merged.metadata.next_column();
            merged.metadata.column_to_attr.insert(next, attr.clone());
        }
    }
}
