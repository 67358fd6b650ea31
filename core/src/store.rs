//! JSON persistence for specification models.
//!
//! A model is stored as one pretty-printed JSON file holding a transient
//! root named `dcmspec` with the `metadata` and `content` subtrees as its
//! children. Attribute order is preserved, and the integer keys of
//! `column_to_attr` are written as JSON strings and coerced back to
//! integers on load.

use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::Serialize;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::info;

use crate::metadata::Metadata;
use crate::model::SpecModel;
use crate::node::Node;

/// Name of the transient file root node.
const FILE_ROOT_NAME: &str = "dcmspec";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The destination directory could not be created.
    #[snafu(display("could not create directory {}", path.display()))]
    CreateDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// The model file could not be created or written.
    #[snafu(display("could not write model file {}", path.display()))]
    WriteModel {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// The model could not be serialized to JSON.
    #[snafu(display("could not serialize model to {}", path.display()))]
    SerializeModel {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    /// The model file could not be opened or read.
    #[snafu(display("could not read model file {}", path.display()))]
    ReadModel {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// The model file is not valid JSON.
    #[snafu(display("could not parse model file {}", path.display()))]
    ParseModel {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    /// The file parsed but does not hold the expected subtrees.
    #[snafu(display("model file {} has no `{subtree}` subtree", path.display()))]
    MalformedModel {
        path: std::path::PathBuf,
        subtree: &'static str,
    },
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Serialize)]
struct MetadataNode<'a> {
    name: &'static str,
    #[serde(flatten)]
    metadata: &'a Metadata,
}

#[derive(Serialize)]
struct FileRoot<'a> {
    name: &'static str,
    children: (MetadataNode<'a>, &'a Node),
}

/// Store that persists models as JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSpecStore;

impl JsonSpecStore {
    pub fn new() -> Self {
        JsonSpecStore
    }

    /// Saves a model to the given path, creating directories on demand.
    ///
    /// Write errors are fatal here; pipelines that treat a cache save as
    /// best effort catch and log them.
    pub fn save(&self, model: &SpecModel, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
        }

        let root = FileRoot {
            name: FILE_ROOT_NAME,
            children: (
                MetadataNode {
                    name: "metadata",
                    metadata: &model.metadata,
                },
                &model.content,
            ),
        };

        let file = File::create(path).context(WriteModelSnafu { path })?;
        let writer = BufWriter::new(file);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(writer, formatter);
        root.serialize(&mut ser)
            .context(SerializeModelSnafu { path })?;

        info!(path = %path.display(), "specification model saved as JSON");
        Ok(())
    }

    /// Loads a model from the given path.
    ///
    /// The `metadata` and `content` subtrees are located by name among the
    /// file root's children, so their order in the file does not matter.
    pub fn load(&self, path: &Path) -> Result<SpecModel> {
        let file = File::open(path).context(ReadModelSnafu { path })?;
        let value: serde_json::Value =
            serde_json::from_reader(BufReader::new(file)).context(ParseModelSnafu { path })?;

        let children = value
            .get("children")
            .and_then(|c| c.as_array())
            .context(MalformedModelSnafu {
                path,
                subtree: "children",
            })?;

        let find = |name: &str| {
            children
                .iter()
                .find(|child| child.get("name").and_then(|n| n.as_str()) == Some(name))
        };

        let metadata = find("metadata").context(MalformedModelSnafu {
            path,
            subtree: "metadata",
        })?;
        let content = find("content").context(MalformedModelSnafu {
            path,
            subtree: "content",
        })?;

        let metadata: Metadata =
            serde_json::from_value(metadata.clone()).context(ParseModelSnafu { path })?;
        let content: Node =
            serde_json::from_value(content.clone()).context(ParseModelSnafu { path })?;

        Ok(SpecModel::new(metadata, content))
    }
}
