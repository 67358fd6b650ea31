//! Builder for expanded IOD specification models.
//!
//! An IOD table of PS3.3 lists the modules making up an object class; each
//! row references the module's section. The builder parses that index
//! table, resolves every referenced module to its own table, builds or
//! reuses the module models, and grafts each module's attribute rows under
//! the IOD row that referenced it. The expanded result is cached as one
//! model.

use std::cell::RefCell;
use std::rc::Rc;

use snafu::Snafu;
use tracing::{info, warn};

use dcmspec_core::model::SpecModel;
use dcmspec_core::node::Node;
use dcmspec_core::progress::{Progress, ProgressObserver, ProgressStatus};
use dcmspec_core::registry::ModuleRegistry;
use dcmspec_parser::dom;

use crate::factory::{self, SpecFactory};

/// Steps reported while building an expanded IOD.
const TOTAL_STEPS: u32 = 4;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// A factory step failed.
    #[snafu(display("could not build IOD model"))]
    Factory {
        #[snafu(source(from(factory::Error, Box::new)))]
        source: Box<factory::Error>,
    },

    /// No module model could be built for any referenced module.
    #[snafu(display("no module models were found for the modules referenced by the IOD table"))]
    NoModules,
}

type Result<T> = std::result::Result<T, Error>;

/// Parameters of one [`IodSpecBuilder::build_from_url`] call.
#[derive(Debug, Clone)]
pub struct IodRequest {
    /// URL the IOD document is downloaded from when not cached.
    pub url: String,
    /// File name of the cached document on the `standard/` tier.
    pub cache_file_name: String,
    /// Anchor id of the IOD modules table.
    pub table_id: String,
    /// File name of the cached expanded model.
    pub json_file_name: Option<String>,
    /// Always download the document and rebuild, even when cached.
    pub force_download: bool,
}

impl IodRequest {
    pub fn new(
        url: impl Into<String>,
        cache_file_name: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        IodRequest {
            url: url.into(),
            cache_file_name: cache_file_name.into(),
            table_id: table_id.into(),
            json_file_name: None,
            force_download: false,
        }
    }
}

/// Orchestrates the construction of an expanded IOD model.
///
/// One factory builds the IOD index model, a second (possibly different)
/// factory builds the module models. Module models are shared through a
/// [`ModuleRegistry`] so that building many IODs parses each module once.
pub struct IodSpecBuilder {
    iod_factory: SpecFactory,
    module_factory: SpecFactory,
    registry: Rc<RefCell<ModuleRegistry>>,
}

impl IodSpecBuilder {
    pub fn new(iod_factory: SpecFactory, module_factory: SpecFactory) -> Self {
        IodSpecBuilder {
            iod_factory,
            module_factory,
            registry: Rc::new(RefCell::new(ModuleRegistry::new())),
        }
    }

    /// Shares a module registry across builders.
    pub fn with_registry(mut self, registry: Rc<RefCell<ModuleRegistry>>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> Rc<RefCell<ModuleRegistry>> {
        self.registry.clone()
    }

    /// Builds and caches an expanded IOD model from a URL.
    pub fn build_from_url(
        &self,
        request: &IodRequest,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<SpecModel> {
        // The expanded model cache short-circuits everything.
        if let Some(model) = self.load_expanded_from_cache(request) {
            return Ok(model);
        }

        // Step 1: load the DOM, downloading the document if needed.
        emit(
            &mut progress,
            Progress::indeterminate(ProgressStatus::DownloadingIod).step(1, TOTAL_STEPS),
        );
        let package = self
            .iod_factory
            .load_document(
                &request.cache_file_name,
                Some(&request.url),
                request.force_download,
                progress.as_mut().map(|o| &mut **o as &mut dyn ProgressObserver),
            )
            .map_err(|source| Error::Factory {
                source: Box::new(source),
            })?;
        let doc = package.as_document();

        // Step 2: build the IOD module list model.
        emit(
            &mut progress,
            Progress::indeterminate(ProgressStatus::ParsingIodModuleList).step(2, TOTAL_STEPS),
        );
        let iod_model = self
            .iod_factory
            .build_model(&doc, &request.table_id, &request.url, None, None, None)
            .map_err(|source| Error::Factory {
                source: Box::new(source),
            })?;

        // Step 3: build or load a model for each referenced module.
        emit(
            &mut progress,
            Progress::indeterminate(ProgressStatus::ParsingIodModules).step(3, TOTAL_STEPS),
        );
        let referencing: Vec<&Node> = iod_model
            .content
            .children
            .iter()
            .filter(|node| node.has_attr("ref"))
            .collect();
        let total_modules = referencing.len();

        let mut module_models: Vec<(String, SpecModel)> = Vec::new();
        for (index, node) in referencing.iter().enumerate() {
            let Some(ref_value) = node.attr_str("ref") else {
                continue;
            };
            let section_id = format!("sect_{ref_value}");
            let Some(module_table_id) = dom::section_to_table_id(&doc, &section_id) else {
                warn!(section_id = %section_id, "no table found for section id");
                continue;
            };

            let module_model = self.module_model(&doc, &module_table_id, &request.url)?;
            module_models.push((ref_value.to_string(), module_model));

            if total_modules > 0 {
                let percent = ((index + 1) * 100 / total_modules) as i32;
                emit(
                    &mut progress,
                    Progress::new(percent, ProgressStatus::ParsingIodModules)
                        .step(3, TOTAL_STEPS),
                );
            }
        }

        if module_models.is_empty() {
            return Err(Error::NoModules);
        }

        // Step 4: assemble and cache the expanded model.
        emit(
            &mut progress,
            Progress::indeterminate(ProgressStatus::SavingIodModel).step(4, TOTAL_STEPS),
        );
        let expanded = expand(&iod_model, &module_models);

        if let Some(json_file_name) = &request.json_file_name {
            let path = self.iod_factory.config().model_path(json_file_name);
            if let Err(e) = self.iod_factory.store().save(&expanded, &path) {
                warn!(path = %path.display(), "failed to cache expanded model: {e}");
            }
        } else {
            info!("no cache file name given; expanded IOD model not cached");
        }

        Ok(expanded)
    }

    fn load_expanded_from_cache(&self, request: &IodRequest) -> Option<SpecModel> {
        let json_file_name = request.json_file_name.as_deref()?;
        let path = self.iod_factory.config().model_path(json_file_name);
        if !path.exists() || request.force_download {
            return None;
        }
        match self.iod_factory.store().load(&path) {
            Ok(model) => {
                info!(path = %path.display(), "loaded expanded IOD model from cache");
                Some(model)
            }
            Err(e) => {
                warn!(path = %path.display(), "failed to load expanded IOD model: {e}");
                None
            }
        }
    }

    /// Resolves one module model: registry first, then the on-disk model
    /// cache, then a fresh build; freshly built or loaded models are
    /// registered for the next IOD.
    fn module_model(
        &self,
        doc: &sxd_document::dom::Document<'_>,
        module_table_id: &str,
        url: &str,
    ) -> Result<SpecModel> {
        if let Some(model) = self.registry.borrow().get(module_table_id) {
            info!(module_table_id, "module model reused from registry");
            return Ok(model.clone());
        }

        let module_json = format!("{module_table_id}.json");
        let path = self.module_factory.config().model_path(&module_json);
        let model = if path.exists() {
            match self.module_factory.store().load(&path) {
                Ok(model) => model,
                Err(e) => {
                    warn!(path = %path.display(), "failed to load module model: {e}");
                    self.build_module(doc, module_table_id, url, &module_json)?
                }
            }
        } else {
            self.build_module(doc, module_table_id, url, &module_json)?
        };

        self.registry
            .borrow_mut()
            .insert(module_table_id, model.clone());
        Ok(model)
    }

    fn build_module(
        &self,
        doc: &sxd_document::dom::Document<'_>,
        module_table_id: &str,
        url: &str,
        module_json: &str,
    ) -> Result<SpecModel> {
        self.module_factory
            .build_model(doc, module_table_id, url, Some(module_json), None, None)
            .map_err(|source| Error::Factory {
                source: Box::new(source),
            })
    }
}

/// Assembles the expanded model: a fresh content root with the IOD index
/// nodes as children, each carrying its module's rows; metadata is taken
/// from the first module with the IOD index table id.
fn expand(iod_model: &SpecModel, module_models: &[(String, SpecModel)]) -> SpecModel {
    let (_, first_module) = &module_models[0];
    let mut metadata = first_module.metadata.clone();
    metadata.table_id = iod_model.metadata.table_id.clone();

    let mut content = Node::new("content");
    for iod_node in &iod_model.content.children {
        let mut iod_node = iod_node.clone();
        if let Some(ref_value) = iod_node.attr_str("ref") {
            if let Some((_, module)) = module_models.iter().find(|(r, _)| r == ref_value) {
                // The module's content children move under the IOD node;
                // registry copies stay untouched.
                iod_node
                    .children
                    .extend(module.content.children.iter().cloned());
            }
        }
        content.children.push(iod_node);
    }

    SpecModel::new(metadata, content)
}

fn emit(progress: &mut Option<&mut dyn ProgressObserver>, value: Progress) {
    if let Some(observer) = progress.as_mut() {
        observer.update(&value);
    }
}
