//! Cache-first construction of a model from a single table.
//!
//! The factory checks the `model/` cache tier first, then acquires the
//! document (possibly from the `standard/` tier), parses the table, fills
//! in the metadata, applies the default filtering, and tries to cache the
//! result. Cache load and save failures are logged, never fatal.

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use sxd_document::dom::Document;
use sxd_document::Package;
use tracing::{info, warn};

use dcmspec_core::config::Config;
use dcmspec_core::model::SpecModel;
use dcmspec_core::progress::ProgressObserver;
use dcmspec_core::store::JsonSpecStore;
use dcmspec_document::xhtml::{XhtmlDocHandler, XhtmlSource};
use dcmspec_parser::table::{DomTableParser, ParseOptions};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The source document could not be acquired.
    #[snafu(display("could not load document"))]
    Document {
        #[snafu(source(from(dcmspec_document::xhtml::Error, Box::new)))]
        source: Box<dcmspec_document::xhtml::Error>,
    },

    /// The table could not be parsed into a model.
    #[snafu(display("could not parse table"))]
    Parse { source: dcmspec_parser::table::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Parameters of one [`SpecFactory::create_model`] call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// URL the document is downloaded from when not cached.
    pub url: String,
    /// File name of the cached document on the `standard/` tier.
    pub cache_file_name: String,
    /// Anchor id of the table to parse.
    pub table_id: String,
    /// File name of the cached model; defaults to the document file name
    /// with a `.json` extension.
    pub json_file_name: Option<String>,
    /// Depth to which included tables are expanded; `None` is unlimited.
    pub include_depth: Option<u32>,
    /// Always download the document, even when cached.
    pub force_download: bool,
    /// Always re-parse the document, even when a cached model exists.
    pub force_parse: bool,
}

impl ModelRequest {
    pub fn new(
        url: impl Into<String>,
        cache_file_name: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        ModelRequest {
            url: url.into(),
            cache_file_name: cache_file_name.into(),
            table_id: table_id.into(),
            json_file_name: None,
            include_depth: None,
            force_download: false,
            force_parse: false,
        }
    }

    fn model_file_name(&self) -> String {
        self.json_file_name.clone().unwrap_or_else(|| {
            let stem = self
                .cache_file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(&self.cache_file_name);
            format!("{stem}.json")
        })
    }
}

/// Factory building one [`SpecModel`] from one table, cache first.
pub struct SpecFactory {
    config: Config,
    handler: Box<dyn XhtmlSource>,
    parser: DomTableParser,
    store: JsonSpecStore,
    column_to_attr: BTreeMap<usize, String>,
    name_attr: String,
    skip_columns: Vec<usize>,
    unformatted_columns: Vec<usize>,
    exclude_titles: bool,
}

impl SpecFactory {
    /// A factory with the default attribute table column map.
    pub fn new(config: Config) -> Self {
        let column_to_attr = [
            (0, "elem_name"),
            (1, "elem_tag"),
            (2, "elem_type"),
            (3, "elem_description"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

        SpecFactory {
            handler: Box::new(XhtmlDocHandler::new(config.clone())),
            config,
            parser: DomTableParser::new(),
            store: JsonSpecStore::new(),
            column_to_attr,
            name_attr: "elem_name".to_string(),
            skip_columns: Vec::new(),
            unformatted_columns: Vec::new(),
            exclude_titles: true,
        }
    }

    /// Replaces the document handler (e.g. with the UPS-patching one).
    pub fn with_handler(mut self, handler: Box<dyn XhtmlSource>) -> Self {
        self.handler = handler;
        self
    }

    /// Replaces the column-to-attribute mapping.
    pub fn with_column_to_attr(mut self, column_to_attr: BTreeMap<usize, String>) -> Self {
        self.column_to_attr = column_to_attr;
        self
    }

    /// Replaces the attribute used to derive node names.
    pub fn with_name_attr(mut self, name_attr: impl Into<String>) -> Self {
        self.name_attr = name_attr.into();
        self
    }

    /// Declares column map keys that may be missing from short rows.
    pub fn with_skip_columns(mut self, skip_columns: Vec<usize>) -> Self {
        self.skip_columns = skip_columns;
        self
    }

    /// Declares column map keys kept as raw inner XML.
    pub fn with_unformatted_columns(mut self, unformatted_columns: Vec<usize>) -> Self {
        self.unformatted_columns = unformatted_columns;
        self
    }

    /// Disables the default removal of module title rows.
    pub fn keep_titles(mut self) -> Self {
        self.exclude_titles = false;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &JsonSpecStore {
        &self.store
    }

    /// Loads the source document through the factory's handler.
    pub fn load_document(
        &self,
        cache_file_name: &str,
        url: Option<&str>,
        force_download: bool,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<Package> {
        self.handler
            .load_document(cache_file_name, url, force_download, progress)
            .context(DocumentSnafu)
    }

    /// Builds a model from an already loaded document.
    ///
    /// Parses the table, completes the metadata with the source URL,
    /// applies the default filtering, and caches the model when a file
    /// name is given; a failed save only warns.
    pub fn build_model(
        &self,
        doc: &Document<'_>,
        table_id: &str,
        url: &str,
        json_file_name: Option<&str>,
        include_depth: Option<u32>,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<SpecModel> {
        let opts = ParseOptions {
            include_depth,
            skip_columns: &self.skip_columns,
            unformatted_columns: &self.unformatted_columns,
        };
        let (mut metadata, content) = self
            .parser
            .parse(doc, table_id, &self.column_to_attr, &self.name_attr, &opts, progress)
            .context(ParseSnafu)?;
        metadata.url = url.to_string();

        let mut model = SpecModel::new(metadata, content);
        if self.exclude_titles {
            model.exclude_titles();
        }

        if let Some(json_file_name) = json_file_name {
            let path = self.config.model_path(json_file_name);
            if let Err(e) = self.store.save(&model, &path) {
                warn!(path = %path.display(), "failed to cache model: {e}");
            }
        }
        Ok(model)
    }

    /// Builds a model for a table, consulting the model cache first.
    pub fn create_model(
        &self,
        request: &ModelRequest,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<SpecModel> {
        let model_file_name = request.model_file_name();
        let model_path = self.config.model_path(&model_file_name);

        if model_path.exists() && !request.force_download && !request.force_parse {
            match self.store.load(&model_path) {
                Ok(model) => {
                    info!(path = %model_path.display(), "loaded model from cache");
                    return Ok(model);
                }
                Err(e) => {
                    warn!(path = %model_path.display(), "failed to load cached model: {e}");
                }
            }
        }

        let package = self.load_document(
            &request.cache_file_name,
            Some(&request.url),
            request.force_download,
            progress.as_mut().map(|o| &mut **o as &mut dyn ProgressObserver),
        )?;
        let doc = package.as_document();
        self.build_model(
            &doc,
            &request.table_id,
            &request.url,
            Some(&model_file_name),
            request.include_depth,
            progress,
        )
    }
}
