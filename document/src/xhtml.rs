//! Cache-aware acquisition of XHTML documents of the standard.
//!
//! Documents live on the `standard/` cache tier. A load first consults the
//! cache, downloading only when the file is absent or a download is
//! forced; downloaded text is cleaned of zero-width spaces and
//! non-breaking spaces before being persisted, and the persisted file is
//! what gets parsed, so cache hits and misses go through the same path.

use std::fs;
use std::path::Path;

use snafu::{OptionExt, ResultExt, Snafu};
use sxd_document::dom::{ChildOfElement, Document, ParentOfChild};
use sxd_document::Package;
use tracing::{info, warn};

use dcmspec_core::config::Config;
use dcmspec_core::progress::{Progress, ProgressObserver, ProgressStatus};
use dcmspec_parser::dom;

use crate::fetch::{FetchError, HttpFetch, UreqFetcher};

/// Table patched by the UPS handler.
const UPS_PATCH_TABLE: &str = "table_CC.2.5-3";
/// Target of the include row that needs an extra nesting marker.
const UPS_PATCH_INCLUDE: &str = "table_CC.2.5-2c";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// A download was required but no URL was given.
    #[snafu(display("a URL is required to download the document"))]
    MissingUrl,

    /// The document could not be downloaded.
    #[snafu(display("could not download document"))]
    Download {
        #[snafu(source(from(FetchError, Box::new)))]
        source: Box<FetchError>,
    },

    /// The cached document could not be written.
    #[snafu(display("could not save document to {}", path.display()))]
    SaveDocument {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// The cached document could not be read.
    #[snafu(display("could not read document from {}", path.display()))]
    ReadDocument {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// The document is not well-formed XML.
    #[snafu(display("could not parse document {}", path.display()))]
    ParseDocument {
        path: std::path::PathBuf,
        source: sxd_document::parser::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Source of parsed XHTML documents.
pub trait XhtmlSource {
    /// Loads a document from the cache, downloading it when needed, and
    /// parses it into a DOM package.
    fn load_document(
        &self,
        cache_file_name: &str,
        url: Option<&str>,
        force_download: bool,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<Package>;
}

/// Default XHTML document handler.
pub struct XhtmlDocHandler {
    config: Config,
    fetcher: Box<dyn HttpFetch>,
}

impl XhtmlDocHandler {
    pub fn new(config: Config) -> Self {
        Self::with_fetcher(config, Box::new(UreqFetcher::new()))
    }

    /// Uses a custom fetcher, e.g. for offline tests.
    pub fn with_fetcher(config: Config, fetcher: Box<dyn HttpFetch>) -> Self {
        XhtmlDocHandler { config, fetcher }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Downloads the document and persists the cleaned text atomically.
    fn download(&self, url: &str, path: &Path) -> Result<()> {
        info!(url, path = %path.display(), "downloading XHTML document");
        let text = self.fetcher.fetch_text(url).context(DownloadSnafu)?;
        let cleaned = text.replace('\u{200b}', "").replace('\u{00a0}', " ");

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context(SaveDocumentSnafu { path: dir })?;
        }
        let staging = path.with_extension("part");
        fs::write(&staging, cleaned).context(SaveDocumentSnafu {
            path: staging.as_path(),
        })?;
        fs::rename(&staging, path).context(SaveDocumentSnafu { path })?;
        info!(path = %path.display(), "document downloaded");
        Ok(())
    }

    /// Parses a cached document file into a DOM package.
    pub fn parse_file(&self, path: &Path) -> Result<Package> {
        info!(path = %path.display(), "reading XHTML DOM");
        let text = fs::read_to_string(path).context(ReadDocumentSnafu { path })?;
        sxd_document::parser::parse(&text).context(ParseDocumentSnafu { path })
    }
}

impl XhtmlSource for XhtmlDocHandler {
    fn load_document(
        &self,
        cache_file_name: &str,
        url: Option<&str>,
        force_download: bool,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<Package> {
        let path = self.config.standard_path(cache_file_name);
        if force_download || !path.exists() {
            let url = url.context(MissingUrlSnafu)?;
            if let Some(observer) = progress.as_mut() {
                observer.update(&Progress::indeterminate(ProgressStatus::Downloading));
            }
            self.download(url, &path)?;
        }
        self.parse_file(&path)
    }
}

/// XHTML handler for the UPS service attribute tables of PS3.4.
///
/// The published document nests the include row under "Output Information
/// Sequence" one level too high; the handler patches the DOM in place
/// before it is handed to the parser.
pub struct UpsXhtmlDocHandler {
    inner: XhtmlDocHandler,
}

impl UpsXhtmlDocHandler {
    pub fn new(config: Config) -> Self {
        UpsXhtmlDocHandler {
            inner: XhtmlDocHandler::new(config),
        }
    }

    pub fn with_fetcher(config: Config, fetcher: Box<dyn HttpFetch>) -> Self {
        UpsXhtmlDocHandler {
            inner: XhtmlDocHandler::with_fetcher(config, fetcher),
        }
    }

    /// Adds one `>` to the include row under Output Information Sequence
    /// so it nests under the sequence. Logs a warning and leaves the DOM
    /// untouched when the target table or row is absent.
    pub fn patch_table(&self, doc: &Document<'_>, table_id: &str) {
        let Some(table) = dom::find_table(doc, table_id) else {
            warn!(table_id, "patch target table not found; nothing to patch");
            return;
        };

        let include_anchor = dom::subtree_elements(table).into_iter().find(|e| {
            dom::local_name(*e) == "a"
                && dom::has_class(*e, "xref")
                && e.attribute_value("href")
                    .is_some_and(|href| href.ends_with(UPS_PATCH_INCLUDE))
        });
        let Some(anchor) = include_anchor else {
            warn!(table_id, "include row to patch not found; nothing to patch");
            return;
        };

        let Some(ParentOfChild::Element(parent)) = anchor.parent() else {
            return;
        };
        for child in parent.children() {
            if let ChildOfElement::Text(text) = child {
                if text.text().contains("Include") {
                    let patched = format!(">{}", text.text());
                    text.set_text(&patched);
                    info!(table_id, "patched include row nesting");
                    return;
                }
            }
        }
        warn!(table_id, "include row text to patch not found; nothing to patch");
    }
}

impl XhtmlSource for UpsXhtmlDocHandler {
    fn load_document(
        &self,
        cache_file_name: &str,
        url: Option<&str>,
        force_download: bool,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<Package> {
        let package = self
            .inner
            .load_document(cache_file_name, url, force_download, progress)?;
        {
            let doc = package.as_document();
            self.patch_table(&doc, UPS_PATCH_TABLE);
        }
        Ok(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct StubFetcher {
        body: String,
        calls: std::rc::Rc<RefCell<usize>>,
    }

    impl StubFetcher {
        fn new(body: &str) -> (Self, std::rc::Rc<RefCell<usize>>) {
            let calls = std::rc::Rc::new(RefCell::new(0));
            (
                StubFetcher {
                    body: body.to_string(),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl HttpFetch for StubFetcher {
        fn fetch_text(&self, _url: &str) -> std::result::Result<String, FetchError> {
            *self.calls.borrow_mut() += 1;
            Ok(self.body.clone())
        }

        fn fetch_bytes(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            unreachable!("XHTML handler only fetches text")
        }
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::from_file(dir.join("no-config.json"));
        config.set_param(
            "cache_dir",
            serde_json::json!(dir.join("cache").to_string_lossy()),
        );
        config
    }

    #[test]
    fn download_cleans_and_caches_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let body = "<html><body><p>a\u{200b}b\u{00a0}c</p></body></html>";
        let (fetcher, calls) = StubFetcher::new(body);
        let handler = XhtmlDocHandler::with_fetcher(test_config(dir.path()), Box::new(fetcher));

        let package = handler
            .load_document("Part3.xhtml", Some("https://example.org/part03.html"), false, None)
            .unwrap();
        let doc = package.as_document();
        assert!(!dom::document_elements(&doc).is_empty());
        assert_eq!(*calls.borrow(), 1);

        let cached = dir.path().join("cache/standard/Part3.xhtml");
        let text = fs::read_to_string(cached).unwrap();
        assert!(text.contains("ab c"));
    }

    #[test]
    fn cached_documents_are_not_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = config.standard_path("Part4.xhtml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "<html><body></body></html>").unwrap();

        let (fetcher, calls) = StubFetcher::new("<html></html>");
        let handler = XhtmlDocHandler::with_fetcher(config, Box::new(fetcher));
        handler.load_document("Part4.xhtml", None, false, None).unwrap();
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn force_download_without_url_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _) = StubFetcher::new("<html></html>");
        let handler = XhtmlDocHandler::with_fetcher(test_config(dir.path()), Box::new(fetcher));
        let err = handler
            .load_document("Part3.xhtml", None, true, None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingUrl));
    }

    const UPS_FIXTURE: &str = r##"<html><body><div class="table">
        <a id="table_CC.2.5-3"></a>
        <table>
            <tr><td><p>&gt;Output Information Sequence</p></td></tr>
            <tr><td colspan="9"><p>
                <span class="italic">&gt;Include <a class="xref" href="#table_CC.2.5-2c">Table CC.2.5-2c</a></span>
            </p></td></tr>
        </table>
    </div></body></html>"##;

    #[test]
    fn ups_patch_adds_one_nesting_marker() {
        let dir = tempfile::tempdir().unwrap();
        let handler = UpsXhtmlDocHandler::new(test_config(dir.path()));
        let package = sxd_document::parser::parse(UPS_FIXTURE).unwrap();
        let doc = package.as_document();

        handler.patch_table(&doc, "table_CC.2.5-3");

        let span = dom::document_elements(&doc)
            .into_iter()
            .find(|e| dom::local_name(*e) == "span")
            .unwrap();
        assert!(dom::text_content(span).starts_with(">>Include"));
    }

    #[test]
    fn ups_patch_with_missing_table_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let handler = UpsXhtmlDocHandler::new(test_config(dir.path()));
        let package = sxd_document::parser::parse("<html><body></body></html>").unwrap();
        let doc = package.as_document();
        // only logs a warning
        handler.patch_table(&doc, "table_CC.2.5-3");
    }
}
