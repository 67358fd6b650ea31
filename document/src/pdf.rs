//! Cache-aware acquisition of PDF documents (IHE Technical Frameworks).
//!
//! Actual PDF table and text extraction stays behind the
//! [`TableExtractor`] seam; this module owns caching, the assembly of one
//! logical table from table fragments spread over several pages, and the
//! harvesting of the numbered notes that IHE tables reference.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, info, warn};

use dcmspec_core::config::Config;
use dcmspec_core::progress::{Progress, ProgressObserver, ProgressStatus};
use dcmspec_parser::csv::LogicalTable;

use crate::fetch::{FetchError, HttpFetch, UreqFetcher};

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
        path: PathBuf,
        source: std::io::Error,
    },

    /// The extractor failed on the cached document.
    #[snafu(display("could not extract tables from {}", path.display()))]
    Extract {
        path: PathBuf,
        source: ExtractError,
    },

    /// A note-scanning pattern is not a valid regular expression.
    #[snafu(display("invalid note pattern `{pattern}`"))]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`TableExtractor`] implementation.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"), context(suffix(ExtractErrorSnafu)))]
pub struct ExtractError {
    pub message: String,
}

impl ExtractError {
    pub fn new(message: impl Into<String>) -> Self {
        ExtractError {
            message: message.into(),
        }
    }
}

/// One table found on a PDF page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfTable {
    /// 1-indexed page number.
    pub page: usize,
    /// Index of the table on its page.
    pub index: usize,
    /// Header cells.
    pub header: Vec<String>,
    /// Data rows.
    pub rows: Vec<Vec<String>>,
}

/// Extraction seam over a PDF library.
pub trait TableExtractor {
    /// Extracts every table found on the given 1-indexed pages, in page
    /// and on-page order.
    fn extract_tables(
        &self,
        path: &Path,
        pages: &[usize],
    ) -> std::result::Result<Vec<PdfTable>, ExtractError>;

    /// Full text of a page, if the page has any.
    fn page_text(
        &self,
        path: &Path,
        page: usize,
    ) -> std::result::Result<Option<String>, ExtractError>;
}

/// Regex patterns driving note extraction.
#[derive(Debug, Clone)]
pub struct NotePatterns {
    /// Identifies a note header line.
    pub note: String,
    /// Skips page header and footer lines.
    pub header_footer: String,
    /// Removes leading line numbers from continuation lines.
    pub line_number: String,
    /// Terminates the notes section.
    pub end_note: String,
}

impl Default for NotePatterns {
    fn default() -> Self {
        NotePatterns {
            note: r"^\d*\s*Note\s\d+:".to_string(),
            header_footer: r"^\s*(IHE|_{3,}|Rev\.|Copyright|Template|Page\s\d+|\(TDW-II\))"
                .to_string(),
            line_number: r"^\d+\s".to_string(),
            end_note: r".*7\.5\.1\.1\.2".to_string(),
        }
    }
}

/// A note harvested from the text around a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub text: String,
    pub table_id: Option<String>,
}

/// Handler for PDF documents on the `standard/` cache tier.
pub struct PdfDocHandler {
    config: Config,
    fetcher: Box<dyn HttpFetch>,
    extractor: Box<dyn TableExtractor>,
}

impl PdfDocHandler {
    pub fn new(config: Config, extractor: Box<dyn TableExtractor>) -> Self {
        Self::with_fetcher(config, Box::new(UreqFetcher::new()), extractor)
    }

    pub fn with_fetcher(
        config: Config,
        fetcher: Box<dyn HttpFetch>,
        extractor: Box<dyn TableExtractor>,
    ) -> Self {
        PdfDocHandler {
            config,
            fetcher,
            extractor,
        }
    }

    /// Loads the document and assembles one logical table from the table
    /// fragments selected by `table_indices`.
    pub fn load_document(
        &self,
        cache_file_name: &str,
        url: Option<&str>,
        force_download: bool,
        pages: &[usize],
        table_indices: &[(usize, usize)],
        table_id: Option<&str>,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<LogicalTable> {
        let path = self.ensure_document(cache_file_name, url, force_download, progress)?;
        debug!(?pages, "extracting tables");
        let tables = self
            .extractor
            .extract_tables(&path, pages)
            .context(ExtractSnafu { path: path.as_path() })?;
        debug!(count = tables.len(), "tables extracted from PDF");
        Ok(self.concat_tables(&tables, table_indices, table_id))
    }

    /// Downloads the document when needed; returns its cache path.
    fn ensure_document(
        &self,
        cache_file_name: &str,
        url: Option<&str>,
        force_download: bool,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<PathBuf> {
        let path = self.config.standard_path(cache_file_name);
        if force_download || !path.exists() {
            let url = url.context(MissingUrlSnafu)?;
            if let Some(observer) = progress.as_mut() {
                observer.update(&Progress::indeterminate(ProgressStatus::Downloading));
            }
            info!(url, path = %path.display(), "downloading PDF document");
            let bytes = self.fetcher.fetch_bytes(url).context(DownloadSnafu)?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).context(SaveDocumentSnafu { path: dir })?;
            }
            let staging = path.with_extension("part");
            std::fs::write(&staging, bytes).context(SaveDocumentSnafu {
                path: staging.as_path(),
            })?;
            std::fs::rename(&staging, &path).context(SaveDocumentSnafu { path: path.as_path() })?;
        } else {
            info!(path = %path.display(), "loading PDF from cache");
        }
        Ok(path)
    }

    /// Concatenates the selected tables into one logical table.
    ///
    /// The first selected table's header wins; rows are padded or
    /// truncated to its width. A diverging header logs a warning and is
    /// otherwise ignored.
    pub fn concat_tables(
        &self,
        tables: &[PdfTable],
        table_indices: &[(usize, usize)],
        table_id: Option<&str>,
    ) -> LogicalTable {
        let mut header: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut first = true;

        for &(page, index) in table_indices {
            for table in tables {
                if table.page != page || table.index != index {
                    continue;
                }
                if first {
                    header = table.header.clone();
                    first = false;
                } else if !header.is_empty() && table.header != header {
                    warn!(
                        page,
                        index,
                        expected = ?header,
                        found = ?table.header,
                        "header mismatch in concatenated tables"
                    );
                }
                let width = header.len();
                for row in &table.rows {
                    let mut row = row.clone();
                    row.resize(width, String::new());
                    rows.push(row);
                }
            }
        }

        LogicalTable {
            table_id: table_id.map(str::to_string),
            header,
            rows,
        }
    }

    /// Scans page text for regex-defined notes.
    ///
    /// A note starts at a line matching the note pattern and continues
    /// over following lines until another note, the terminator pattern, or
    /// the end of the selected pages; header and footer lines are skipped
    /// and leading line numbers are stripped from continuations.
    pub fn extract_notes(
        &self,
        cache_file_name: &str,
        pages: &[usize],
        table_id: Option<&str>,
        patterns: &NotePatterns,
    ) -> Result<IndexMap<String, Note>> {
        let note_re = compile(&patterns.note)?;
        let header_footer_re = compile(&patterns.header_footer)?;
        let line_number_re = compile(&patterns.line_number)?;
        let end_note_re = compile(&patterns.end_note)?;
        let leading_number_re = compile(r"^\d*\s*")?;

        let path = self.config.standard_path(cache_file_name);
        let mut notes: IndexMap<String, Note> = IndexMap::new();
        let mut current: Option<String> = None;

        for &page in pages {
            let text = self
                .extractor
                .page_text(&path, page)
                .context(ExtractSnafu { path: path.as_path() })?;
            let Some(text) = text else {
                continue;
            };
            for line in text.lines() {
                if header_footer_re.is_match(line) {
                    continue;
                }
                if end_note_re.is_match(line) {
                    current = None;
                    break;
                }
                if let Some(found) = note_re.find(line) {
                    // Note key without any leading line number.
                    let key = leading_number_re
                        .replace(found.as_str().trim(), "")
                        .into_owned();
                    let text = line[found.end()..].trim().to_string();
                    notes.insert(
                        key.clone(),
                        Note {
                            text,
                            table_id: table_id.map(str::to_string),
                        },
                    );
                    current = Some(key);
                } else if let Some(key) = &current {
                    let line = line_number_re.replace(line, "").trim().to_string();
                    if let Some(note) = notes.get_mut(key) {
                        note.text.push(' ');
                        note.text.push_str(&line);
                    }
                }
            }
        }

        if !notes.is_empty() {
            debug!(keys = ?notes.keys().collect::<Vec<_>>(), "extracted notes");
        }
        Ok(notes)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).context(PatternSnafu { pattern })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StubExtractor {
        tables: Vec<PdfTable>,
        texts: HashMap<usize, String>,
    }

    impl TableExtractor for StubExtractor {
        fn extract_tables(
            &self,
            _path: &Path,
            pages: &[usize],
        ) -> std::result::Result<Vec<PdfTable>, ExtractError> {
            Ok(self
                .tables
                .iter()
                .filter(|t| pages.contains(&t.page))
                .cloned()
                .collect())
        }

        fn page_text(
            &self,
            _path: &Path,
            page: usize,
        ) -> std::result::Result<Option<String>, ExtractError> {
            Ok(self.texts.get(&page).cloned())
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

    fn handler_with(dir: &Path, extractor: StubExtractor) -> PdfDocHandler {
        struct NoFetch;
        impl HttpFetch for NoFetch {
            fn fetch_text(&self, _url: &str) -> std::result::Result<String, FetchError> {
                unreachable!("PDF handler only fetches bytes")
            }
            fn fetch_bytes(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
                Ok(b"%PDF-1.4".to_vec())
            }
        }
        PdfDocHandler::with_fetcher(test_config(dir), Box::new(NoFetch), Box::new(extractor))
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn concat_takes_the_first_header_and_pads_rows() {
        let dir = tempfile::tempdir().unwrap();
        let tables = vec![
            PdfTable {
                page: 57,
                index: 1,
                header: row(&["Name", "Tag", "Type"]),
                rows: vec![row(&["A", "(1,2)", "1"])],
            },
            PdfTable {
                page: 58,
                index: 0,
                // diverging header: warns, rows still used
                header: row(&["Name", "Tag"]),
                rows: vec![row(&["B", "(3,4)"]), row(&["C", "(5,6)", "2", "extra"])],
            },
        ];
        let handler = handler_with(dir.path(), StubExtractor {
            tables,
            texts: HashMap::new(),
        });

        let table = handler.concat_tables(
            &handler
                .extractor
                .extract_tables(Path::new("x"), &[57, 58])
                .unwrap(),
            &[(57, 1), (58, 0)],
            Some("tdwii_ups"),
        );

        assert_eq!(table.table_id.as_deref(), Some("tdwii_ups"));
        assert_eq!(table.header, row(&["Name", "Tag", "Type"]));
        assert_eq!(
            table.rows,
            vec![
                row(&["A", "(1,2)", "1"]),
                row(&["B", "(3,4)", ""]),
                row(&["C", "(5,6)", "2"]),
            ]
        );
    }

    #[test]
    fn load_document_downloads_once_and_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let tables = vec![PdfTable {
            page: 3,
            index: 0,
            header: row(&["Name"]),
            rows: vec![row(&["X"])],
        }];
        let handler = handler_with(dir.path(), StubExtractor {
            tables,
            texts: HashMap::new(),
        });

        let table = handler
            .load_document(
                "TF.pdf",
                Some("https://example.org/TF.pdf"),
                false,
                &[3],
                &[(3, 0)],
                Some("T-1"),
                None,
            )
            .unwrap();
        assert_eq!(table.rows.len(), 1);
        assert!(dir.path().join("cache/standard/TF.pdf").exists());
    }

    #[test]
    fn missing_url_for_uncached_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler_with(dir.path(), StubExtractor {
            tables: Vec::new(),
            texts: HashMap::new(),
        });
        let err = handler
            .load_document("TF.pdf", None, false, &[1], &[], None, None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingUrl));
    }

    #[test]
    fn notes_are_keyed_and_continued_across_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut texts = HashMap::new();
        texts.insert(
            60,
            [
                "IHE Technical Framework",
                "12 Note 1: first part",
                "13 continues here",
                "Page 60",
                "14 Note 2: second note",
            ]
            .join("\n"),
        );
        let handler = handler_with(dir.path(), StubExtractor {
            tables: Vec::new(),
            texts,
        });

        let notes = handler
            .extract_notes("TF.pdf", &[60], Some("T-7.5-1"), &NotePatterns::default())
            .unwrap();

        assert_eq!(notes.len(), 2);
        let first = &notes["Note 1:"];
        assert_eq!(first.text, "first part continues here");
        assert_eq!(first.table_id.as_deref(), Some("T-7.5-1"));
        assert_eq!(notes["Note 2:"].text, "second note");
    }

    #[test]
    fn end_pattern_stops_note_collection() {
        let dir = tempfile::tempdir().unwrap();
        let mut texts = HashMap::new();
        texts.insert(
            61,
            ["10 Note 1: kept", "7.5.1.1.2 Next Section", "12 Note 2: dropped"].join("\n"),
        );
        let handler = handler_with(dir.path(), StubExtractor {
            tables: Vec::new(),
            texts,
        });

        let notes = handler
            .extract_notes("TF.pdf", &[61], None, &NotePatterns::default())
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes.contains_key("Note 1:"));
    }
}
